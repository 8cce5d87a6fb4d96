//! Protocol commit subject/trailer grammar (§3.2, §4.2).
//!
//! Grounded structurally on the teacher's `io/git.rs` subprocess-wrapper
//! idiom (§ explicit working directory, `Result`-returning helpers) but the
//! grammar itself — `task({branch}@{task_id}@{status}): {text}` plus a fixed
//! canonical trailer block — has no teacher analogue; it is new per
//! `spec.md` §3.2/§4.2.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::types::Status;

pub const TRAILER_STEP: &str = "Arborist-Step";
pub const TRAILER_RESULT: &str = "Arborist-Result";
pub const TRAILER_TEST: &str = "Arborist-Test";
pub const TRAILER_TEST_TYPE: &str = "Arborist-Test-Type";
pub const TRAILER_TEST_PASSED: &str = "Arborist-Test-Passed";
pub const TRAILER_TEST_FAILED: &str = "Arborist-Test-Failed";
pub const TRAILER_TEST_SKIPPED: &str = "Arborist-Test-Skipped";
pub const TRAILER_TEST_RUNTIME: &str = "Arborist-Test-Runtime";
pub const TRAILER_REVIEW: &str = "Arborist-Review";
pub const TRAILER_RETRY: &str = "Arborist-Retry";
pub const TRAILER_REPORT: &str = "Arborist-Report";
pub const TRAILER_TEST_LOG: &str = "Arborist-Test-Log";
pub const TRAILER_REVIEW_LOG: &str = "Arborist-Review-Log";

/// Canonical trailer order (§3.2 table), so that round-tripping is stable
/// and diffs of commit bodies are reviewable.
const CANONICAL_ORDER: &[&str] = &[
    TRAILER_STEP,
    TRAILER_RESULT,
    TRAILER_TEST,
    TRAILER_TEST_TYPE,
    TRAILER_TEST_PASSED,
    TRAILER_TEST_FAILED,
    TRAILER_TEST_SKIPPED,
    TRAILER_TEST_RUNTIME,
    TRAILER_REVIEW,
    TRAILER_RETRY,
    TRAILER_REPORT,
    TRAILER_TEST_LOG,
    TRAILER_REVIEW_LOG,
];

pub type Trailers = BTreeMap<String, String>;

/// Everything needed to compose one protocol commit message.
pub struct CommitSpec<'a> {
    pub branch: &'a str,
    pub task_id: &'a str,
    pub status: Status,
    /// Free text after `{status}):` in the subject line. Must be
    /// deterministic given (task description, attempt, step, result) — no
    /// timestamps or absolute paths (§4.5 edge cases).
    pub subject_text: &'a str,
    /// Prose body, placed between the subject and the trailer block.
    /// May be empty.
    pub body: &'a str,
    pub trailers: Trailers,
}

/// Compose the subject line per §3.2: `task({branch}@{task_id}@{status}): {text}`.
pub fn compose_subject(branch: &str, task_id: &str, status: Status, subject_text: &str) -> String {
    format!("task({branch}@{task_id}@{status}): {subject_text}")
}

/// Compose the full commit message: subject, blank line, body, blank line,
/// trailers in canonical order.
pub fn compose_message(spec: &CommitSpec<'_>) -> String {
    let subject = compose_subject(spec.branch, spec.task_id, spec.status, spec.subject_text);
    let trailer_block = render_trailers(&spec.trailers);

    let mut message = subject;
    message.push('\n');
    message.push('\n');
    if !spec.body.is_empty() {
        message.push_str(spec.body.trim_end());
        message.push('\n');
        message.push('\n');
    }
    message.push_str(&trailer_block);
    message
}

/// Render trailers in canonical order; keys not in `CANONICAL_ORDER` are
/// appended afterward, sorted lexicographically, so that trailers added by
/// a future engine version (or preserved-but-unknown ones) still round-trip.
pub fn render_trailers(trailers: &Trailers) -> String {
    let mut ordered: Vec<(&str, &str)> = Vec::with_capacity(trailers.len());
    for &key in CANONICAL_ORDER {
        if let Some(value) = trailers.get(key) {
            ordered.push((key, value.as_str()));
        }
    }
    let mut unknown: Vec<(&str, &str)> = trailers
        .iter()
        .filter(|(key, _)| !CANONICAL_ORDER.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    unknown.sort_by_key(|(key, _)| *key);
    ordered.extend(unknown);

    let mut out = String::new();
    for (key, value) in ordered {
        let _ = writeln!(out, "{key}: {value}");
    }
    out
}

/// A parsed protocol-commit subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSubject {
    pub branch: String,
    pub task_id: String,
    pub status: Status,
    pub text: String,
}

/// Parse a subject line per §3.2. Returns `None` for anything that is not a
/// well-formed protocol commit subject (including unknown status tokens) —
/// such commits are ordinary, non-protocol commits to this reader.
pub fn parse_subject(subject: &str) -> Option<ParsedSubject> {
    let rest = subject.strip_prefix("task(")?;
    let (header, text) = rest.split_once("): ").or_else(|| rest.split_once("):"))?;
    let text = text.to_string();

    let (branch_and_task, status_str) = header.rsplit_once('@')?;
    let (branch, task_id) = branch_and_task.rsplit_once('@')?;
    if branch.is_empty() || task_id.is_empty() {
        return None;
    }
    let status: Status = status_str.parse().ok()?;

    Some(ParsedSubject {
        branch: branch.to_string(),
        task_id: task_id.to_string(),
        status,
        text,
    })
}

/// A fully parsed protocol commit: subject decomposed, prose body, and
/// trailers. Produced by [`parse_commit`] from a raw `git log` record.
///
/// `body` retains the free-text prose (minus the trailer block and its
/// separating blank line) because the garden engine's retry feedback
/// (§4.5 step 1b) is reconstructed directly from a prior attempt's failure
/// commit bodies — there is no sidecar that duplicates this text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolCommit {
    pub sha: String,
    pub branch: String,
    pub task_id: String,
    pub status: Status,
    pub subject_text: String,
    pub body: String,
    pub trailers: Trailers,
}

impl ProtocolCommit {
    pub fn retry(&self) -> Option<u32> {
        self.trailers.get(TRAILER_RETRY).and_then(|v| v.parse().ok())
    }

    pub fn result_is_pass(&self) -> bool {
        self.trailers
            .get(TRAILER_RESULT)
            .is_some_and(|v| v == "pass")
    }
}

/// Parse one raw commit (sha + full message, subject on the first line) into
/// a [`ProtocolCommit`], or `None` if the subject is not a protocol commit.
pub fn parse_commit(sha: &str, message: &str) -> Option<ProtocolCommit> {
    let mut lines = message.splitn(2, '\n');
    let subject = lines.next().unwrap_or_default();
    let rest = lines.next().unwrap_or_default();

    let parsed_subject = parse_subject(subject)?;
    let (body, trailers) = split_prose_and_trailers(rest);

    Some(ProtocolCommit {
        sha: sha.to_string(),
        branch: parsed_subject.branch,
        task_id: parsed_subject.task_id,
        status: parsed_subject.status,
        subject_text: parsed_subject.text,
        body,
        trailers,
    })
}

/// The literal fixed-string grep prefix for all protocol commits on `branch`
/// (§4.2 `LogForBranch`). Used with `git log --fixed-strings --grep=`.
pub fn branch_log_prefix(branch: &str) -> String {
    format!("task({branch}@")
}

/// The literal fixed-string grep prefix for protocol commits on `branch`
/// touching `task_id` (§4.2 `LogForTask`).
pub fn task_log_prefix(branch: &str, task_id: &str) -> String {
    format!("task({branch}@{task_id}@")
}

/// Parse trailer lines from a commit body. Trailers are lines of shape
/// `^[A-Za-z][A-Za-z0-9-]*: .*$` appearing in the contiguous block at the
/// end of the message; duplicate keys resolve last-wins.
pub fn parse_trailers(body: &str) -> Trailers {
    split_prose_and_trailers(body).1
}

/// Split a message's post-subject text into (prose body, trailers).
///
/// Walks backward from the end: trailing blank lines are dropped, then the
/// contiguous run of trailer-shaped lines before them becomes the trailer
/// block, then one blank separator line (if present) immediately before the
/// block is dropped too. Everything remaining, rejoined, is the prose body.
fn split_prose_and_trailers(rest: &str) -> (String, Trailers) {
    let lines: Vec<&str> = rest.lines().collect();

    let mut end = lines.len();
    while end > 0 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }

    let mut start = end;
    while start > 0 && split_trailer_line(lines[start - 1]).is_some() {
        start -= 1;
    }

    let mut trailers = Trailers::new();
    for line in &lines[start..end] {
        if let Some((key, value)) = split_trailer_line(line) {
            trailers.insert(key.to_string(), value.to_string());
        }
    }

    let mut prose_end = start;
    while prose_end > 0 && lines[prose_end - 1].trim().is_empty() {
        prose_end -= 1;
    }

    (lines[..prose_end].join("\n"), trailers)
}

fn split_trailer_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(": ")?;
    if key.is_empty() {
        return None;
    }
    let mut chars = key.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips() {
        let subject = compose_subject("feature/x", "T001", Status::ImplementPass, "implement attempt 0");
        let parsed = parse_subject(&subject).expect("parses");
        assert_eq!(parsed.branch, "feature/x");
        assert_eq!(parsed.task_id, "T001");
        assert_eq!(parsed.status, Status::ImplementPass);
        assert_eq!(parsed.text, "implement attempt 0");
    }

    #[test]
    fn subject_with_slashes_and_dots_in_branch() {
        let subject = compose_subject("feature/spec-1.2+x", "T001", Status::Complete, "done");
        let parsed = parse_subject(&subject).expect("parses");
        assert_eq!(parsed.branch, "feature/spec-1.2+x");
    }

    #[test]
    fn non_protocol_subject_is_rejected() {
        assert!(parse_subject("chore: update readme").is_none());
        assert!(parse_subject("task(main@T001@bogus-status): x").is_none());
    }

    #[test]
    fn trailers_round_trip_in_canonical_order() {
        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_RETRY.to_string(), "0".to_string());
        trailers.insert(TRAILER_STEP.to_string(), "implement".to_string());
        trailers.insert(TRAILER_RESULT.to_string(), "pass".to_string());

        let rendered = render_trailers(&trailers);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec!["Arborist-Step: implement", "Arborist-Result: pass", "Arborist-Retry: 0"]
        );

        let parsed = parse_trailers(&rendered);
        assert_eq!(parsed, trailers);
    }

    #[test]
    fn unknown_trailers_are_preserved_but_sorted_after_known_ones() {
        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_STEP.to_string(), "implement".to_string());
        trailers.insert("X-Custom".to_string(), "value".to_string());

        let rendered = render_trailers(&trailers);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines, vec!["Arborist-Step: implement", "X-Custom: value"]);
    }

    #[test]
    fn duplicate_trailer_keys_resolve_last_wins() {
        let body = "Arborist-Step: implement\nArborist-Step: test\n";
        let trailers = parse_trailers(body);
        assert_eq!(trailers.get(TRAILER_STEP).map(String::as_str), Some("test"));
    }

    #[test]
    fn trailer_block_must_be_contiguous_at_end() {
        let body = "Some prose.\n\nArborist-Step: implement\nArborist-Result: pass\n";
        let trailers = parse_trailers(body);
        assert_eq!(trailers.len(), 2);

        let body_with_interruption = "Arborist-Step: implement\n\nmore prose\n\nArborist-Result: pass\n";
        let trailers = parse_trailers(body_with_interruption);
        assert_eq!(trailers.len(), 1);
        assert!(trailers.contains_key(TRAILER_RESULT));
    }

    #[test]
    fn compose_message_includes_subject_body_and_trailers() {
        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_STEP.to_string(), "implement".to_string());
        trailers.insert(TRAILER_RESULT.to_string(), "pass".to_string());
        trailers.insert(TRAILER_RETRY.to_string(), "0".to_string());

        let spec = CommitSpec {
            branch: "main",
            task_id: "T001",
            status: Status::ImplementPass,
            subject_text: "implement T001",
            body: "Runner summary: wrote src/lib.rs",
            trailers,
        };
        let message = compose_message(&spec);
        assert!(message.starts_with("task(main@T001@implement-pass): implement T001\n\n"));
        assert!(message.contains("Runner summary: wrote src/lib.rs"));
        assert!(message.ends_with("Arborist-Retry: 0\n"));
    }

    #[test]
    fn parse_commit_extracts_subject_and_trailers() {
        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_STEP.to_string(), "test".to_string());
        trailers.insert(TRAILER_TEST.to_string(), "pass".to_string());
        trailers.insert(TRAILER_RETRY.to_string(), "1".to_string());
        let spec = CommitSpec {
            branch: "main",
            task_id: "T001",
            status: Status::TestPass,
            subject_text: "test T001",
            body: "",
            trailers,
        };
        let message = compose_message(&spec);

        let commit = parse_commit("abc123", &message).expect("parses");
        assert_eq!(commit.task_id, "T001");
        assert_eq!(commit.status, Status::TestPass);
        assert_eq!(commit.retry(), Some(1));
    }

    #[test]
    fn parse_commit_recovers_prose_body_for_feedback() {
        let mut trailers = Trailers::new();
        trailers.insert(TRAILER_STEP.to_string(), "test".to_string());
        trailers.insert(TRAILER_TEST.to_string(), "fail".to_string());
        let spec = CommitSpec {
            branch: "main",
            task_id: "T001",
            status: Status::TestFail,
            subject_text: "test T001 attempt 0",
            body: "AssertionError: expected 2 got 1",
            trailers,
        };
        let message = compose_message(&spec);
        let commit = parse_commit("abc123", &message).expect("parses");
        assert_eq!(commit.body, "AssertionError: expected 2 got 1");
    }

    #[test]
    fn log_prefixes_are_fixed_strings_not_regex() {
        assert_eq!(branch_log_prefix("feature/x"), "task(feature/x@");
        assert_eq!(task_log_prefix("feature/x", "T001"), "task(feature/x@T001@");
    }
}
