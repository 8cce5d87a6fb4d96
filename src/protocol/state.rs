//! State reader (§4.3): map a task id to its current state by inspecting
//! the newest matching protocol commit on the current branch. Never caches
//! across gardener iterations — every call re-derives from the commits it
//! is given (§9 "log-based state vs. in-memory state").

use std::collections::HashSet;

use crate::core::types::{Status, TaskState};
use crate::protocol::commit::ProtocolCommit;
use crate::tree::TaskTree;

/// Derive a task's state from its commits, newest-first (as `git log`
/// returns them). An empty slice means no commits were ever recorded for
/// this task on this branch.
pub fn derive_task_state(commits_newest_first: &[ProtocolCommit]) -> TaskState {
    match commits_newest_first.first() {
        None => TaskState::Pending,
        Some(commit) => match commit.status {
            Status::ImplementPass | Status::ImplementFail => TaskState::Implementing,
            Status::TestPass | Status::TestFail => TaskState::Testing,
            Status::ReviewApproved | Status::ReviewRejected => TaskState::Reviewing,
            Status::Complete => TaskState::Complete,
            Status::Failed => TaskState::Failed,
        },
    }
}

pub fn is_complete(commits_newest_first: &[ProtocolCommit]) -> bool {
    derive_task_state(commits_newest_first).is_complete()
}

/// The max `Arborist-Retry` across matching commits, or `-1` if none.
pub fn last_attempt_number(commits_newest_first: &[ProtocolCommit]) -> i64 {
    commits_newest_first
        .iter()
        .filter_map(ProtocolCommit::retry)
        .map(i64::from)
        .max()
        .unwrap_or(-1)
}

/// Collect every leaf in `tree` whose state is `complete`, by invoking
/// `log_for_task(task_id)` once per leaf. The lookup is injected so this
/// function stays pure/IO-free and unit-testable without a real repository;
/// `io::git` supplies the real implementation in production.
pub fn completed_tasks<F>(tree: &TaskTree, mut log_for_task: F) -> HashSet<String>
where
    F: FnMut(&str) -> Vec<ProtocolCommit>,
{
    tree.leaves()
        .into_iter()
        .filter(|leaf| is_complete(&log_for_task(&leaf.id)))
        .map(|leaf| leaf.id.clone())
        .collect()
}
