//! Aggregated test-only fixtures, mirroring the teacher's own
//! `src/test_support.rs`: a single place integration tests under `tests/`
//! (and unit tests elsewhere in this crate) pull shared doubles from, rather
//! than reaching into each module's private fixtures individually.

use std::path::Path;

use anyhow::Result;

pub use crate::io::git::test_support::init_repo;
pub use crate::io::runner::{RunResult, ScriptedRunner};
pub use crate::tree::fixtures::single_leaf_tree;

use crate::io::git::Git;

/// A throwaway git repo plus its [`Git`] handle, for tests that need a real
/// working tree (commits, diffs, merges) without touching the developer's
/// own repository.
pub struct TestRepo {
    dir: tempfile::TempDir,
    git: Git,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let git = init_repo(dir.path())?;
        Ok(Self { dir, git })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> &Git {
        &self.git
    }
}

/// A deterministic [`RunResult`] for tests that don't care about the
/// output/error split beyond pass/fail.
pub fn scripted_result(success: bool, output: &str) -> RunResult {
    RunResult {
        success,
        output: output.to_string(),
        error: if success {
            None
        } else {
            Some("scripted failure".to_string())
        },
        exit_code: Some(if success { 0 } else { 1 }),
    }
}
