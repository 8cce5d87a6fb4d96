//! Process exit codes (§6.4).

/// The gardener/garden ran to a successful terminal state.
pub const SUCCESS: i32 = 0;
/// The run stalled (no ready leaves with unfinished work) or a task/phase
/// gate failed.
pub const STALLED_OR_TASK_FAILURE: i32 = 1;
/// The task tree or CLI invocation itself was invalid.
pub const INVALID_INPUT: i32 = 2;
