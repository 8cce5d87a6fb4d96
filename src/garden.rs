//! The garden engine (§4.5): drives one leaf task from `pending` (or a
//! resumed intermediate state) through implement → test → review → complete
//! on the current branch, re-deriving its position from the branch's
//! protocol-commit log on every turn so a crash mid-attempt is recoverable
//! at step granularity without any in-memory or on-disk run state.
//!
//! Grounded structurally on the teacher's `core/looping.rs` attempt-loop
//! shape (bounded retries, typed terminal outcomes) but built around this
//! engine's own state machine, since the teacher has no implement/test/review
//! pipeline of its own.

use std::time::Duration;

use anyhow::Result;

use crate::core::types::{Status, Step, TaskState};
use crate::io::artifacts::{ArtifactsRoot, TaskReport};
use crate::io::git::Git;
use crate::io::runner::Runner;
use crate::io::test_exec::{self, TestExecConfig};
use crate::prompt::{self, AttemptFeedback};
use crate::protocol::commit::{
    CommitSpec, ProtocolCommit, Trailers, TRAILER_RESULT, TRAILER_RETRY, TRAILER_REVIEW, TRAILER_STEP,
    TRAILER_TEST, TRAILER_TEST_FAILED, TRAILER_TEST_PASSED, TRAILER_TEST_RUNTIME, TRAILER_TEST_SKIPPED,
    TRAILER_TEST_TYPE, compose_message,
};
use crate::protocol::state::{derive_task_state, last_attempt_number};
use crate::tree::TaskNode;

/// Timeouts, retry budget, and output limits for one `garden()` call.
#[derive(Debug, Clone)]
pub struct GardenPolicy {
    pub max_retries: u32,
    pub implement_timeout: Duration,
    pub test_timeout: Duration,
    pub review_timeout: Duration,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
}

/// Collaborators a garden run needs, gathered so `garden()` takes one
/// argument per concern rather than five positional ones.
pub struct GardenDeps<'a> {
    pub git: &'a Git,
    pub implement_runner: &'a dyn Runner,
    pub review_runner: &'a dyn Runner,
    pub artifacts: Option<&'a ArtifactsRoot>,
}

/// Terminal result of running one leaf to completion (§4.5).
#[derive(Debug, Clone)]
pub enum GardenOutcome {
    Complete,
    TaskFailed { last_commit_sha: String },
}

/// Run `task` on `branch` to a terminal state, resuming from whatever step
/// the branch's commit log implies (§4.5 edge case "resumption in
/// mid-attempt").
pub fn garden(branch: &str, task: &TaskNode, deps: &GardenDeps, policy: &GardenPolicy) -> Result<GardenOutcome> {
    loop {
        let commits = deps.git.log_for_task(branch, &task.id)?;
        let state = derive_task_state(&commits);

        if let Some(outcome) = terminal_outcome(&commits, state) {
            return Ok(outcome);
        }

        let (step, attempt) = resume_point(&commits, state);

        if attempt > policy.max_retries {
            return emit_terminal(branch, task, deps, attempt.saturating_sub(1), false);
        }

        match step {
            Step::Implement => run_implement_step(branch, task, deps, policy, &commits, attempt)?,
            Step::Test => run_test_step(branch, task, deps, policy, attempt)?,
            Step::Review => run_review_step(branch, task, deps, policy, &commits, attempt)?,
            Step::Complete => return emit_terminal(branch, task, deps, attempt, true),
        }
    }
}

/// `None` unless the newest commit already records a terminal step, in
/// which case a fresh `garden()` call is a no-op by construction (§5
/// "no duplicate work").
fn terminal_outcome(commits: &[ProtocolCommit], state: TaskState) -> Option<GardenOutcome> {
    if !state.is_terminal() {
        return None;
    }
    let newest = commits.first().expect("terminal state implies a commit exists");
    Some(if newest.result_is_pass() {
        GardenOutcome::Complete
    } else {
        GardenOutcome::TaskFailed {
            last_commit_sha: newest.sha.clone(),
        }
    })
}

/// Determine the next step to run and the attempt number it belongs to,
/// from the newest commit on the branch for this task (§4.5 edge cases).
fn resume_point(commits: &[ProtocolCommit], state: TaskState) -> (Step, u32) {
    let last_attempt = last_attempt_number(commits);
    match state {
        TaskState::Pending => (Step::Implement, (last_attempt + 1).max(0) as u32),
        TaskState::Implementing => {
            let newest = commits.first().expect("implementing implies a commit exists");
            if newest.status == Status::ImplementPass {
                (Step::Test, last_attempt.max(0) as u32)
            } else {
                (Step::Implement, (last_attempt + 1).max(0) as u32)
            }
        }
        TaskState::Testing => {
            let newest = commits.first().expect("testing implies a commit exists");
            if newest.status == Status::TestPass {
                (Step::Review, last_attempt.max(0) as u32)
            } else {
                (Step::Implement, (last_attempt + 1).max(0) as u32)
            }
        }
        TaskState::Reviewing => {
            let newest = commits.first().expect("reviewing implies a commit exists");
            if newest.status == Status::ReviewApproved {
                (Step::Complete, last_attempt.max(0) as u32)
            } else {
                (Step::Implement, (last_attempt + 1).max(0) as u32)
            }
        }
        TaskState::Complete | TaskState::Failed => {
            unreachable!("terminal states are handled by terminal_outcome before resume_point runs")
        }
    }
}

/// Feedback for attempt N (N > 0) is reconstructed from attempt N-1's
/// failure commit bodies (§4.5 step 1b) — no sidecar, the commit log is the
/// only record.
fn attempt_feedback(commits: &[ProtocolCommit], attempt: u32) -> Option<AttemptFeedback> {
    let previous = attempt.checked_sub(1)?;
    let mut feedback = AttemptFeedback::default();
    for commit in commits {
        if commit.retry() != Some(previous) {
            continue;
        }
        match commit.status {
            Status::TestFail if feedback.test_output.is_none() => {
                feedback.test_output = Some(commit.body.clone());
            }
            Status::ReviewRejected if feedback.review_reason.is_none() => {
                feedback.review_reason = Some(commit.body.clone());
            }
            _ => {}
        }
    }
    if feedback.test_output.is_none() && feedback.review_reason.is_none() {
        None
    } else {
        Some(feedback)
    }
}

fn run_implement_step(
    branch: &str,
    task: &TaskNode,
    deps: &GardenDeps,
    policy: &GardenPolicy,
    commits: &[ProtocolCommit],
    attempt: u32,
) -> Result<()> {
    let feedback = attempt_feedback(commits, attempt);
    let prompt_text = prompt::build_implement_prompt(task, feedback.as_ref(), policy.prompt_budget_bytes);
    let run = deps
        .implement_runner
        .run(&prompt_text, deps.git.workdir(), policy.implement_timeout)?;

    // An empty response is treated the same as a declined/failed run (§4.5
    // step 4 "empty no-op response"), not as a silent implement-pass.
    let declined = run.output.trim().is_empty();
    let passed = run.success && !declined;

    let body = if passed {
        run.output.clone()
    } else if let Some(error) = &run.error {
        error.clone()
    } else {
        "runner produced no output".to_string()
    };

    let status = if passed { Status::ImplementPass } else { Status::ImplementFail };
    let subject = format!("implement {} attempt {attempt} ({})", task.id, status.as_str());
    let mut trailers = Trailers::new();
    trailers.insert(TRAILER_STEP.to_string(), Step::Implement.to_string());
    trailers.insert(TRAILER_RESULT.to_string(), if passed { "pass" } else { "fail" }.to_string());
    trailers.insert(TRAILER_RETRY.to_string(), attempt.to_string());

    commit_step(branch, task, deps, status, &subject, &body, trailers, "implement", attempt)
}

fn run_test_step(
    branch: &str,
    task: &TaskNode,
    deps: &GardenDeps,
    policy: &GardenPolicy,
    attempt: u32,
) -> Result<()> {
    let outcome = test_exec::run_tests(
        &task.test_commands,
        deps.git.workdir(),
        TestExecConfig {
            timeout: policy.test_timeout,
            output_limit_bytes: policy.output_limit_bytes,
        },
    )?;

    let status = if outcome.passed { Status::TestPass } else { Status::TestFail };
    let subject = format!("test {} attempt {attempt} ({})", task.id, status.as_str());
    let body = outcome
        .results
        .iter()
        .map(|r| format!("[{}] exit={:?} timed_out={}\n{}", r.command, r.exit_code, r.timed_out, r.output))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut trailers = Trailers::new();
    trailers.insert(TRAILER_STEP.to_string(), Step::Test.to_string());
    trailers.insert(TRAILER_TEST.to_string(), if outcome.passed { "pass" } else { "fail" }.to_string());
    if let Some(kind) = outcome.first_failure_kind {
        trailers.insert(TRAILER_TEST_TYPE.to_string(), kind.to_string());
    }
    if let Some(counts) = outcome.counts {
        trailers.insert(TRAILER_TEST_PASSED.to_string(), counts.passed.to_string());
        trailers.insert(TRAILER_TEST_FAILED.to_string(), counts.failed.to_string());
        trailers.insert(TRAILER_TEST_SKIPPED.to_string(), counts.skipped.to_string());
    }
    trailers.insert(TRAILER_TEST_RUNTIME.to_string(), format!("{:.3}", outcome.runtime.as_secs_f64()));
    trailers.insert(TRAILER_RETRY.to_string(), attempt.to_string());

    commit_step(branch, task, deps, status, &subject, &body, trailers, "test", attempt)
}

fn run_review_step(
    branch: &str,
    task: &TaskNode,
    deps: &GardenDeps,
    policy: &GardenPolicy,
    commits: &[ProtocolCommit],
    attempt: u32,
) -> Result<()> {
    let base = attempt_base_sha(deps.git, commits, attempt)?;
    let head = deps.git.head_sha()?;
    let diff = deps.git.diff(&base, &head)?;

    let prompt_text = prompt::build_review_prompt(task, &diff, policy.prompt_budget_bytes);
    let run = deps.review_runner.run(&prompt_text, deps.git.workdir(), policy.review_timeout)?;

    let (approved, reason) = if run.success {
        prompt::parse_review_verdict(&run.output)
    } else {
        (false, Some(run.error.unwrap_or_else(|| "review runner failed".to_string())))
    };

    let status = if approved { Status::ReviewApproved } else { Status::ReviewRejected };
    let subject = format!("review {} attempt {attempt} ({})", task.id, status.as_str());
    let body = reason.unwrap_or_default();

    let mut trailers = Trailers::new();
    trailers.insert(TRAILER_STEP.to_string(), Step::Review.to_string());
    trailers.insert(TRAILER_REVIEW.to_string(), if approved { "approved" } else { "rejected" }.to_string());
    trailers.insert(TRAILER_RETRY.to_string(), attempt.to_string());

    commit_step(branch, task, deps, status, &subject, &body, trailers, "review", attempt)
}

fn commit_step(
    branch: &str,
    task: &TaskNode,
    deps: &GardenDeps,
    status: Status,
    subject: &str,
    body: &str,
    trailers: Trailers,
    step_name: &str,
    attempt: u32,
) -> Result<()> {
    let spec = CommitSpec {
        branch,
        task_id: &task.id,
        status,
        subject_text: subject,
        body,
        trailers,
    };
    let message = compose_message(&spec);
    deps.git.commit_protocol(&message)?;

    if let Some(artifacts) = deps.artifacts {
        artifacts.write_log(&task.id, step_name, i64::from(attempt), body)?;
        artifacts.write_report(&TaskReport {
            task_id: &task.id,
            branch,
            status: status.as_str(),
            attempt: i64::from(attempt),
            step: step_name,
        })?;
    }
    Ok(())
}

/// The sha right before this attempt's IMPLEMENT commit — the base of the
/// review diff (§4.5 step REVIEW.1b). Found as the parent of the attempt's
/// implement commit, since that commit is always written before TEST/REVIEW
/// can run.
fn attempt_base_sha(git: &Git, commits: &[ProtocolCommit], attempt: u32) -> Result<String> {
    let implement_commit = commits
        .iter()
        .find(|c| c.status == Status::ImplementPass && c.retry() == Some(attempt))
        .expect("review step implies a passing implement commit exists for this attempt");
    git.parent_sha(&implement_commit.sha)
}

fn emit_terminal(branch: &str, task: &TaskNode, deps: &GardenDeps, attempt: u32, success: bool) -> Result<GardenOutcome> {
    let status = if success { Status::Complete } else { Status::Failed };
    let subject = format!(
        "{} {} after {} attempt(s)",
        if success { "complete" } else { "failed" },
        task.id,
        attempt + 1
    );
    let mut trailers = Trailers::new();
    trailers.insert(TRAILER_STEP.to_string(), Step::Complete.to_string());
    trailers.insert(TRAILER_RESULT.to_string(), if success { "pass" } else { "fail" }.to_string());
    trailers.insert(TRAILER_RETRY.to_string(), attempt.to_string());

    let spec = CommitSpec {
        branch,
        task_id: &task.id,
        status,
        subject_text: &subject,
        body: "",
        trailers,
    };
    let message = compose_message(&spec);
    let sha = deps.git.commit_protocol(&message)?;

    if let Some(artifacts) = deps.artifacts {
        artifacts.write_report(&TaskReport {
            task_id: &task.id,
            branch,
            status: status.as_str(),
            attempt: i64::from(attempt),
            step: "complete",
        })?;
    }

    Ok(if success {
        GardenOutcome::Complete
    } else {
        GardenOutcome::TaskFailed { last_commit_sha: sha }
    })
}
