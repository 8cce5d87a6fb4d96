//! Side-effecting adapters: subprocess execution, git, configuration,
//! runner invocation, test execution, and artifact/lockfile bookkeeping.
//! Everything here is the mockable "impure" half of the crate, mirroring
//! the teacher's `core/` (pure) vs `io/` (impure) split.

pub mod artifacts;
pub mod config;
pub mod git;
pub mod lockfile;
pub mod process;
pub mod runner;
pub mod test_exec;
