//! The `Runner` abstraction (§6.2): `Runner.Run(prompt, cwd, timeout) ->
//! RunResult`. Grounded on the teacher's `io/executor.rs` `Executor` trait
//! and `CodexExecutor`/`FakeExecutor` split — one trait, one concrete
//! subprocess-backed implementation, one scripted test double. Unlike the
//! teacher's executor, which writes structured JSON output to a file and a
//! schema-validated contract, `spec.md` reduces the contract to a plain
//! prompt-in/result-out call (§9 "duck-typed runner adapters" re-architected
//! as a single narrow trait).

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Outcome of one `Runner.Run` invocation (§6.2).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

/// Abstraction over AI runner backends. The engine does not dictate how the
/// runner modifies files, only that after a successful return the working
/// tree reflects its edits (§6.2) — no commit is required from the runner.
pub trait Runner {
    fn run(&self, prompt: &str, cwd: &Path, timeout: Duration) -> Result<RunResult>;
}

/// Invokes a configured command line as a subprocess, piping `prompt` on
/// stdin. The default command (`claude -p`) and the Gemini/OpenCode
/// alternatives are resolved by [`crate::io::config::RunnerSpec`]; this
/// struct just runs whatever command line it is given.
pub struct ShellRunner {
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Runner for ShellRunner {
    #[instrument(skip_all, fields(cwd = %cwd.display(), timeout_secs = timeout.as_secs()))]
    fn run(&self, prompt: &str, cwd: &Path, timeout: Duration) -> Result<RunResult> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(RunResult {
                success: false,
                output: String::new(),
                error: Some("runner command is empty".to_string()),
                exit_code: None,
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);

        debug!(command = ?self.command, "invoking runner");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.output_limit_bytes,
        )?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "runner timed out");
            return Ok(RunResult {
                success: false,
                output: output.stdout_lossy(),
                error: Some(format!("runner timed out after {}s", timeout.as_secs())),
                exit_code: None,
            });
        }

        let success = output.succeeded();
        let error = if success {
            None
        } else {
            Some(output.stderr_lossy())
        };

        Ok(RunResult {
            success,
            output: output.stdout_lossy(),
            error,
            exit_code: output.status.code(),
        })
    }
}

/// A scripted runner for deterministic tests (mirrors the teacher's
/// `ScriptedExecutor`/`FakeExecutor`): returns one queued [`RunResult`] per
/// call, in order, panicking if the script is exhausted.
#[cfg(any(test, feature = "test-support"))]
pub struct ScriptedRunner {
    results: std::sync::Mutex<std::collections::VecDeque<RunResult>>,
}

#[cfg(any(test, feature = "test-support"))]
impl ScriptedRunner {
    pub fn new(results: impl IntoIterator<Item = RunResult>) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into_iter().collect()),
        }
    }

    pub fn always(result: RunResult) -> RepeatingRunner {
        RepeatingRunner { result }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Runner for ScriptedRunner {
    fn run(&self, _prompt: &str, _cwd: &Path, _timeout: Duration) -> Result<RunResult> {
        let mut results = self.results.lock().expect("scripted runner lock");
        Ok(results
            .pop_front()
            .expect("ScriptedRunner script exhausted"))
    }
}

/// A runner that always returns the same result, for tests that don't care
/// about attempt-by-attempt variation.
#[cfg(any(test, feature = "test-support"))]
pub struct RepeatingRunner {
    result: RunResult,
}

#[cfg(any(test, feature = "test-support"))]
impl Runner for RepeatingRunner {
    fn run(&self, _prompt: &str, _cwd: &Path, _timeout: Duration) -> Result<RunResult> {
        Ok(self.result.clone())
    }
}
