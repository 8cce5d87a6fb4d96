//! Test executor (§4.4): run configured test commands, never fail the
//! engine, and produce a structured result.
//!
//! Grounded on `eval/judge.rs` `run_command_check` (subprocess, timeout,
//! truncation, exit-code-driven pass/fail) and the teacher's
//! `core/classifier.rs` pattern of small, pure, deterministically-tested
//! classification functions — here applied to framework test-output
//! parsing instead of changed-path classification.

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use tracing::instrument;

use crate::io::process::run_command_with_timeout;
use crate::tree::{TestCommand, TestKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestCounts {
    fn merge(self, other: TestCounts) -> TestCounts {
        TestCounts {
            passed: self.passed + other.passed,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestCommandResult {
    pub kind: Option<TestKind>,
    pub command: String,
    pub passed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub counts: Option<TestCounts>,
}

/// Aggregate result of running every configured [`TestCommand`] for a leaf.
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    pub passed: bool,
    pub runtime: Duration,
    pub counts: Option<TestCounts>,
    /// The `type` of the first failing command, for the `Arborist-Test-Type`
    /// trailer. `None` when every command passed or there were none.
    pub first_failure_kind: Option<TestKind>,
    pub results: Vec<TestCommandResult>,
}

impl TestRunOutcome {
    /// The no-op result for a leaf with an empty `test_commands` list
    /// (§4.5 "Empty test list: TEST is a no-op `test-pass`").
    pub fn empty_pass() -> Self {
        Self {
            passed: true,
            runtime: Duration::ZERO,
            counts: None,
            first_failure_kind: None,
            results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TestExecConfig {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Run every configured test command in order (§4.4). Only an infrastructure
/// error (the shell itself cannot be spawned) is surfaced as `Err`; command
/// failure, non-zero exit, and timeout are all captured in the returned
/// outcome.
#[instrument(skip_all, fields(cwd = %cwd.display(), commands = commands.len()))]
pub fn run_tests(commands: &[TestCommand], cwd: &Path, config: TestExecConfig) -> Result<TestRunOutcome> {
    if commands.is_empty() {
        return Ok(TestRunOutcome::empty_pass());
    }

    let start = Instant::now();
    let mut results = Vec::with_capacity(commands.len());
    let mut counts: Option<TestCounts> = None;
    let mut first_failure_kind = None;
    let mut overall_passed = true;

    for test_command in commands {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&test_command.command).current_dir(cwd);
        let output =
            run_command_with_timeout(cmd, None, config.timeout, config.output_limit_bytes)?;

        let passed = output.succeeded();
        let combined = output.combined_lossy();
        let parsed = parse_test_counts(&combined);

        if !passed {
            overall_passed = false;
            if first_failure_kind.is_none() {
                first_failure_kind = Some(test_command.kind);
            }
        }
        counts = match (counts, parsed) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.merge(b)),
        };

        results.push(TestCommandResult {
            kind: Some(test_command.kind),
            command: test_command.command.clone(),
            passed,
            timed_out: output.timed_out,
            exit_code: output.status.code(),
            output: combined,
            counts: parsed,
        });
    }

    Ok(TestRunOutcome {
        passed: overall_passed,
        runtime: start.elapsed(),
        counts,
        first_failure_kind,
        results,
    })
}

static PYTEST_PASSED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passed").unwrap());
static PYTEST_FAILED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) failed").unwrap());
static PYTEST_SKIPPED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) skipped").unwrap());
static PYTEST_XFAILED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) xfailed").unwrap());
static JS_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s*(\d+) passed,\s*(\d+) failed,\s*(\d+) skipped").unwrap()
});
static GO_PASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- PASS").unwrap());
static GO_FAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- FAIL").unwrap());
static GO_SKIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- SKIP").unwrap());

/// Best-effort framework-output parsing (§4.4). Missing counts must never
/// alter the pass/fail decision, which is driven solely by exit code and
/// timeout — this function is purely additive metadata.
fn parse_test_counts(output: &str) -> Option<TestCounts> {
    if let Some(counts) = parse_js_summary(output) {
        return Some(counts);
    }
    if let Some(counts) = parse_pytest(output) {
        return Some(counts);
    }
    parse_go(output)
}

fn parse_pytest(output: &str) -> Option<TestCounts> {
    let passed = sum_matches(&PYTEST_PASSED, output);
    let failed = sum_matches(&PYTEST_FAILED, output);
    let xfailed = sum_matches(&PYTEST_XFAILED, output);
    let skipped = sum_matches(&PYTEST_SKIPPED, output) + xfailed;
    if passed == 0 && failed == 0 && skipped == 0 {
        return None;
    }
    Some(TestCounts {
        passed,
        failed,
        skipped,
    })
}

fn parse_js_summary(output: &str) -> Option<TestCounts> {
    let caps = JS_SUMMARY.captures(output)?;
    Some(TestCounts {
        passed: caps[1].parse().ok()?,
        failed: caps[2].parse().ok()?,
        skipped: caps[3].parse().ok()?,
    })
}

fn parse_go(output: &str) -> Option<TestCounts> {
    let passed = GO_PASS.find_iter(output).count() as u32;
    let failed = GO_FAIL.find_iter(output).count() as u32;
    let skipped = GO_SKIP.find_iter(output).count() as u32;
    if passed == 0 && failed == 0 && skipped == 0 {
        return None;
    }
    Some(TestCounts {
        passed,
        failed,
        skipped,
    })
}

fn sum_matches(re: &Regex, output: &str) -> u32 {
    re.captures_iter(output)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .sum()
}
