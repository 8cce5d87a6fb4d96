//! Git adapter (§6.3): the minimal set of git operations the engine needs,
//! each taking an explicit working directory (§9 "no ambient CWD
//! assumptions" — this is also what makes every test use its own temp
//! repo).
//!
//! Adapted from the teacher's `io/git.rs` `Git` wrapper (subprocess per
//! operation, `run`/`run_checked`/`run_capture` layering) and extended with
//! `git log --fixed-strings --grep=`, `git diff`, and `git merge --no-ff`,
//! none of which the teacher needs — grounded structurally on
//! `rxfork-worktrunk/src/git.rs`'s subprocess-wrapper idiom around
//! diff/merge-base queries.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::protocol::commit::{self, ProtocolCommit};

const RECORD_SEP: char = '\x1e';
const FIELD_SEP: char = '\x1f';

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn show_toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut msg = String::from("working tree not clean:\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])?
            .status;
        Ok(status.success())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Stage everything, then commit — creating an empty commit if there is
    /// nothing to stage (§4.2 step 3: bookkeeping commits such as
    /// test-only/review-only steps must still land even with no file
    /// changes).
    #[instrument(skip_all)]
    pub fn commit_protocol(&self, message: &str) -> Result<String> {
        self.add_all()?;
        self.run_checked(&["commit", "--allow-empty", "-m", message])?;
        self.head_sha()
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// The parent sha of `sha` (used to find a retry attempt's pre-attempt
    /// base when resuming mid-attempt and recomputing a review diff range).
    pub fn parent_sha(&self, sha: &str) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", &format!("{sha}^")])?.trim().to_string())
    }

    /// All protocol commits on `HEAD` whose subject carries the branch-scoped
    /// prefix `task({branch}@` (§4.2 `LogForBranch`). Newest-first.
    pub fn log_for_branch(&self, branch: &str) -> Result<Vec<ProtocolCommit>> {
        let prefix = commit::branch_log_prefix(branch);
        let commits = self.log_grep(&prefix)?;
        Ok(commits.into_iter().filter(|c| c.branch == branch).collect())
    }

    /// All protocol commits on `HEAD` for `task_id` on `branch` (§4.2
    /// `LogForTask`). Newest-first.
    pub fn log_for_task(&self, branch: &str, task_id: &str) -> Result<Vec<ProtocolCommit>> {
        let prefix = commit::task_log_prefix(branch, task_id);
        let commits = self.log_grep(&prefix)?;
        Ok(commits
            .into_iter()
            .filter(|c| c.branch == branch && c.task_id == task_id)
            .collect())
    }

    /// `git log --fixed-strings --grep=<prefix>`, parsed into
    /// [`ProtocolCommit`]s. Non-protocol matches (grep hit in the body but
    /// not actually a protocol subject) are silently dropped; callers
    /// additionally re-check `branch`/`task_id` since `--grep` matches
    /// anywhere in the message, not just the subject.
    fn log_grep(&self, prefix: &str) -> Result<Vec<ProtocolCommit>> {
        let format = format!("%H{FIELD_SEP}%B{RECORD_SEP}");
        let output = self.run_checked(&[
            "log",
            "--fixed-strings",
            &format!("--grep={prefix}"),
            &format!("--pretty=format:{format}"),
        ])?;
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(parse_log_records(&raw))
    }

    /// `git diff <from>..<to>` (§6.3, used to build review prompts).
    pub fn diff(&self, from: &str, to: &str) -> Result<String> {
        let range = format!("{from}..{to}");
        self.run_capture(&["diff", &range])
    }

    /// `git merge --no-ff <branch>` (§4.6 phase gate only).
    #[instrument(skip_all, fields(branch))]
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<()> {
        self.run_checked(&["merge", "--no-ff", branch, "-m", message])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_log_records(raw: &str) -> Vec<ProtocolCommit> {
    raw.split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            if record.is_empty() {
                return None;
            }
            let (sha, message) = record.split_once(FIELD_SEP)?;
            commit::parse_commit(sha, message)
        })
        .collect()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::Git;
    use anyhow::{Context, Result};
    use std::path::Path;
    use std::process::Command;

    /// Initialize a throwaway git repo suitable for tests: `git init`,
    /// identity config, an initial empty commit on `main`.
    pub fn init_repo(dir: &Path) -> Result<Git> {
        run(dir, &["init", "--initial-branch=main", "-q"])?;
        run(dir, &["config", "user.email", "arborist@example.invalid"])?;
        run(dir, &["config", "user.name", "Arborist Test"])?;
        run(dir, &["commit", "--allow-empty", "-q", "-m", "initial commit"])?;
        Ok(Git::new(dir))
    }

    fn run(dir: &Path, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            anyhow::bail!("git {} failed", args.join(" "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Status;
    use crate::protocol::commit::{CommitSpec, Trailers};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn commit_protocol_creates_empty_commit_when_nothing_staged() {
        let temp = tempdir().expect("tempdir");
        let git = test_support::init_repo(temp.path()).expect("init");

        let spec = CommitSpec {
            branch: "main",
            task_id: "T001",
            status: Status::Complete,
            subject_text: "no-op complete",
            body: "",
            trailers: Trailers::new(),
        };
        let message = commit::compose_message(&spec);
        let sha = git.commit_protocol(&message).expect("commit");
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn log_for_task_returns_newest_first_and_filters_by_branch_and_task() {
        let temp = tempdir().expect("tempdir");
        let git = test_support::init_repo(temp.path()).expect("init");

        for (task_id, text) in [("T001", "attempt 0"), ("T001", "attempt 1")] {
            fs::write(temp.path().join("file.txt"), text).expect("write");
            let mut trailers = Trailers::new();
            trailers.insert("Arborist-Step".to_string(), "implement".to_string());
            trailers.insert("Arborist-Retry".to_string(), "0".to_string());
            let spec = CommitSpec {
                branch: "main",
                task_id,
                status: Status::ImplementPass,
                subject_text: text,
                body: "",
                trailers,
            };
            let message = commit::compose_message(&spec);
            git.commit_protocol(&message).expect("commit");
        }

        let commits = git.log_for_task("main", "T001").expect("log");
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject_text, "attempt 1");
        assert_eq!(commits[1].subject_text, "attempt 0");

        let other_branch = git.log_for_task("other", "T001").expect("log");
        assert!(other_branch.is_empty());
    }

    #[test]
    fn parent_sha_resolves_one_generation_back() {
        let temp = tempdir().expect("tempdir");
        let git = test_support::init_repo(temp.path()).expect("init");
        let initial = git.head_sha().expect("head");
        fs::write(temp.path().join("a.txt"), "hello").expect("write");
        git.commit_protocol("chore: add file").expect("commit");
        let head = git.head_sha().expect("head");
        assert_eq!(git.parent_sha(&head).expect("parent"), initial);
    }

    #[test]
    fn diff_and_merge_no_ff_round_trip() {
        let temp = tempdir().expect("tempdir");
        let git = test_support::init_repo(temp.path()).expect("init");

        git.checkout_new_branch("feature").expect("branch");
        fs::write(temp.path().join("a.txt"), "hello").expect("write");
        git.commit_protocol("chore: add file").expect("commit");

        let diff = git.diff("main", "feature").expect("diff");
        assert!(diff.contains("a.txt"));

        git.checkout_branch("main").expect("checkout");
        git.merge_no_ff("feature", "merge feature into main").expect("merge");
        assert!(temp.path().join("a.txt").exists());
    }
}
