//! Phase gate (§4.6): once every leaf under a root phase is complete, run
//! that phase's own integration/e2e test commands and merge the run branch
//! into the configured base branch with `--no-ff` semantics, preserving the
//! run's history.
//!
//! Grounded on the teacher's `io/git.rs` merge/diff helpers (extended here
//! with `merge_no_ff`) and on [`crate::io::test_exec::run_tests`] for the
//! gating commands themselves, reusing the same executor rather than a
//! separate "integration test" code path.

use std::collections::HashSet;

use anyhow::Result;

use crate::core::types::{Status, Step};
use crate::io::artifacts::{ArtifactsRoot, TaskReport};
use crate::io::git::Git;
use crate::io::test_exec::{self, TestExecConfig};
use crate::protocol::commit::{CommitSpec, Trailers, compose_message, TRAILER_STEP, TRAILER_TEST};
use crate::tree::{TaskTree, TestKind};

/// Result of attempting a phase gate (§4.6).
#[derive(Debug, Clone)]
pub enum PhaseGateOutcome {
    /// The phase's integration/e2e tests passed and the run branch was
    /// merged into the base branch.
    Merged,
    /// The phase's integration/e2e tests failed; a `test-fail` commit was
    /// recorded and the run branch was left unmerged (§4.6 step 2).
    Failed { last_commit_sha: String },
}

pub struct MergeDeps<'a> {
    pub git: &'a Git,
    pub artifacts: Option<&'a ArtifactsRoot>,
}

/// Whether every leaf under `phase_id` (the root/phase node) is in `completed`.
pub fn phase_is_complete(tree: &TaskTree, phase_id: &str, completed: &HashSet<String>) -> bool {
    tree.leaves()
        .into_iter()
        .filter(|leaf| tree.phase_of(&leaf.id) == Some(phase_id))
        .all(|leaf| completed.contains(&leaf.id))
}

/// Run `phase_id`'s own integration/e2e test commands and, on success, merge
/// `run_branch` into `base_branch` (§4.6). Callers must first confirm
/// [`phase_is_complete`] — this function does not re-check.
pub fn run_phase_gate(
    tree: &TaskTree,
    phase_id: &str,
    run_branch: &str,
    base_branch: &str,
    deps: &MergeDeps,
    config: TestExecConfig,
) -> Result<PhaseGateOutcome> {
    let phase = tree
        .node(phase_id)
        .unwrap_or_else(|| panic!("phase id '{phase_id}' must exist in the tree"));

    let gating_commands: Vec<_> = phase
        .test_commands
        .iter()
        .filter(|tc| tc.kind != TestKind::Unit)
        .cloned()
        .collect();

    let outcome = test_exec::run_tests(&gating_commands, deps.git.workdir(), config)?;

    if !outcome.passed {
        let body = outcome
            .results
            .iter()
            .map(|r| format!("[{}] exit={:?}\n{}", r.command, r.exit_code, r.output))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_STEP.to_string(), Step::Test.to_string());
        trailers.insert(TRAILER_TEST.to_string(), "fail".to_string());

        let spec = CommitSpec {
            branch: run_branch,
            task_id: phase_id,
            status: Status::TestFail,
            subject_text: "phase gate integration/e2e tests",
            body: &body,
            trailers,
        };
        let message = compose_message(&spec);
        let sha = deps.git.commit_protocol(&message)?;

        if let Some(artifacts) = deps.artifacts {
            artifacts.write_report(&TaskReport {
                task_id: phase_id,
                branch: run_branch,
                status: Status::TestFail.as_str(),
                attempt: 0,
                step: "phase-gate",
            })?;
        }

        return Ok(PhaseGateOutcome::Failed { last_commit_sha: sha });
    }

    deps.git.checkout_branch(base_branch)?;
    let message = format!("merge {run_branch} into {base_branch}: phase {phase_id} complete");
    deps.git.merge_no_ff(run_branch, &message)?;

    // Leave the working tree on run_branch: callers (the gardener loop) keep
    // recording protocol commits for the next phase's leaves on run_branch's
    // own history, not on base_branch (§4.6 — the run branch must keep
    // advancing across phase gates, not just at the very end).
    deps.git.checkout_branch(run_branch)?;

    Ok(PhaseGateOutcome::Merged)
}
