//! Optional report/log sidecars (§3.3, §6.5). The commit trailers are the
//! durable record; these files are a convenience for humans and dashboards
//! and their absence must never change engine behavior — every writer here
//! is called for its side effect only, never consulted for control flow.
//!
//! Grounded on the teacher's `io/config.rs` atomic-write idiom, reused for
//! a JSON report instead of a TOML config, plus a plain append-only log
//! writer for the raw runner/test transcripts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// One JSON report per task, overwritten on every step (§6.5).
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport<'a> {
    pub task_id: &'a str,
    pub branch: &'a str,
    pub status: &'a str,
    pub attempt: i64,
    pub step: &'a str,
}

/// Root of the artifacts tree, as configured by
/// [`crate::io::config::GardenerConfig::artifacts_dir`].
pub struct ArtifactsRoot {
    root: PathBuf,
}

impl ArtifactsRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Write `reports/<task_id>.json`, replacing any prior report.
    pub fn write_report(&self, report: &TaskReport) -> Result<()> {
        let dir = self.reports_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(format!("{}.json", report.task_id));
        let body = serde_json::to_string_pretty(report).context("serialize task report")?;
        write_atomic(&path, &body)
    }

    /// Write `logs/<task_id>-<step>-<attempt>.log`, replacing any prior log
    /// for the same step/attempt.
    pub fn write_log(&self, task_id: &str, step: &str, attempt: i64, contents: &str) -> Result<PathBuf> {
        let dir = self.logs_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(format!("{task_id}-{step}-{attempt}.log"));
        write_atomic(&path, contents)?;
        Ok(path)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp artifact {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace artifact {}", path.display()))?;
    Ok(())
}
