//! Closed variant sets shared across the protocol codec, state reader, and
//! garden engine. Grounded on the teacher's `core/types.rs` split between
//! `Mode`/`GuardOutcome` (small closed enums) and the summary structs built
//! from them.

use std::fmt;
use std::str::FromStr;

/// One of the four steps a protocol commit can record (§3.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Implement,
    Test,
    Review,
    Complete,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Implement => "implement",
            Step::Test => "test",
            Step::Review => "review",
            Step::Complete => "complete",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implement" => Ok(Step::Implement),
            "test" => Ok(Step::Test),
            "review" => Ok(Step::Review),
            "complete" => Ok(Step::Complete),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// The closed status set from §4.2, embedded in the commit subject's
/// `{status}` slot and implying the `Arborist-Step`/`Arborist-Result` (or
/// `Arborist-Test`/`Arborist-Review`) trailers that must accompany it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    ImplementPass,
    ImplementFail,
    TestPass,
    TestFail,
    ReviewApproved,
    ReviewRejected,
    Complete,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::ImplementPass => "implement-pass",
            Status::ImplementFail => "implement-fail",
            Status::TestPass => "test-pass",
            Status::TestFail => "test-fail",
            Status::ReviewApproved => "review-approved",
            Status::ReviewRejected => "review-rejected",
            Status::Complete => "complete",
            Status::Failed => "failed",
        }
    }

    /// The `Arborist-Step` trailer value implied by this status.
    pub fn step(self) -> Step {
        match self {
            Status::ImplementPass | Status::ImplementFail => Step::Implement,
            Status::TestPass | Status::TestFail => Step::Test,
            Status::ReviewApproved | Status::ReviewRejected => Step::Review,
            Status::Complete | Status::Failed => Step::Complete,
        }
    }

    /// Whether this status represents a passing outcome of its step.
    pub fn is_pass(self) -> bool {
        matches!(
            self,
            Status::ImplementPass | Status::TestPass | Status::ReviewApproved | Status::Complete
        )
    }

    /// `complete`/`failed` are the two terminal statuses for a task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implement-pass" => Ok(Status::ImplementPass),
            "implement-fail" => Ok(Status::ImplementFail),
            "test-pass" => Ok(Status::TestPass),
            "test-fail" => Ok(Status::TestFail),
            "review-approved" => Ok(Status::ReviewApproved),
            "review-rejected" => Ok(Status::ReviewRejected),
            "complete" => Ok(Status::Complete),
            "failed" => Ok(Status::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// Per-task state, derived purely from the newest matching protocol commit
/// on the current branch (§4.3). Never cached across gardener iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Implementing,
    Testing,
    Reviewing,
    Complete,
    Failed,
}

impl TaskState {
    pub fn is_complete(self) -> bool {
        matches!(self, TaskState::Complete)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Implementing => "implementing",
            TaskState::Testing => "testing",
            TaskState::Reviewing => "reviewing",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
