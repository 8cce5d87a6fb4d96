//! Advisory PID lockfile (§5): best-effort protection against two
//! gardener processes racing on the same tree, not a correctness
//! requirement — git itself remains the source of truth, so a stale or
//! missing lockfile must never block progress.
//!
//! Grounded on the atomic-write pattern in `io/config.rs` (itself adapted
//! from the teacher's `io/config.rs`/`io/run_state.rs`), applied to a
//! single PID line instead of structured config.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};

/// An acquired lock; removes the lockfile on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Whether `pid` is still a running process, checked via `/proc` on Linux.
/// Unsupported platforms (no `/proc`) conservatively report `true` so a
/// stale lock is never force-broken where liveness can't be verified.
#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

/// Acquire the lock at `path`, stealing it if the recorded PID is no
/// longer alive. Returns `Err` only when another live process holds it.
pub fn acquire(path: &Path) -> Result<LockGuard> {
    if let Ok(existing) = fs::read_to_string(path) {
        if let Some(pid) = existing.trim().parse::<u32>().ok().filter(|pid| pid_is_alive(*pid)) {
            anyhow::bail!("lockfile {} held by live process {pid}", path.display());
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("lock.tmp");
    fs::write(&tmp_path, process::id().to_string())
        .with_context(|| format!("write temp lockfile {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("install lockfile {}", path.display()))?;
    Ok(LockGuard {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("arborist.lock");
        let guard = acquire(&path).expect("acquire");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, process::id().to_string());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn acquire_steals_lock_from_dead_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("arborist.lock");
        fs::write(&path, "999999999").unwrap();
        let guard = acquire(&path).expect("acquire should steal stale lock");
        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
        drop(guard);
    }

    #[test]
    fn acquire_fails_against_live_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("arborist.lock");
        fs::write(&path, process::id().to_string()).unwrap();
        assert!(acquire(&path).is_err());
    }
}
