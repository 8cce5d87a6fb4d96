//! IMPLEMENT/REVIEW prompt construction (§4.5). Grounded on the teacher's
//! `io/prompt.rs` ordered-sections-with-priority-dropping builder; the
//! feedback block this engine needs is reconstructed directly from the
//! previous attempt's commit bodies rather than read from a `.runner/context/`
//! sidecar, since state here lives entirely in git history.

use crate::tree::TaskNode;

const IMPLEMENT_CONTRACT: &str =
    "Implement the task described below in this working tree. Do not create a commit; the engine commits your changes for you.";
const REVIEW_CONTRACT: &str =
    "Review the diff below against the task description. End your response with a final line: either `APPROVED` or `REJECTED: <reason>`.";

/// A named, priority-ordered section of a prompt. Sections are rendered in
/// declaration order; when the budget is exceeded, droppable sections are
/// removed in `drop_order`, cheapest-to-lose first, before the last
/// remaining section is truncated.
#[derive(Debug, Clone)]
struct Section {
    key: &'static str,
    title: &'static str,
    content: String,
    required: bool,
}

impl Section {
    fn required(key: &'static str, title: &'static str, content: impl Into<String>) -> Self {
        Self {
            key,
            title,
            content: content.into(),
            required: true,
        }
    }

    fn droppable(key: &'static str, title: &'static str, content: impl Into<String>) -> Self {
        Self {
            key,
            title,
            content: content.into(),
            required: false,
        }
    }

    fn render(&self) -> String {
        format!("### {}\n\n{}\n", self.title, self.content.trim())
    }

    fn render_len(&self) -> usize {
        self.render().len()
    }

    fn truncate_to(&mut self, max_len: usize) {
        let header_footer = format!("### {}\n\n\n", self.title).len();
        let available = max_len.saturating_sub(header_footer);
        if self.content.len() <= available {
            return;
        }
        let suffix = "\n[truncated]";
        if available <= suffix.len() {
            self.content = suffix[..available.min(suffix.len())].to_string();
            return;
        }
        self.content.truncate(available - suffix.len());
        self.content.push_str(suffix);
    }
}

fn render_task(node: &TaskNode) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("id: {}\n", node.id));
    buf.push_str(&format!("name: {}\n", node.name));
    buf.push_str(&format!("description: {}\n", node.description));
    if !node.test_commands.is_empty() {
        buf.push_str("acceptance tests:\n");
        for tc in &node.test_commands {
            buf.push_str(&format!("- [{}] {}\n", tc.kind, tc.command));
        }
    }
    buf
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize, drop_order: &[&str]) {
    let mut total: usize = sections.iter().map(Section::render_len).sum();
    if total <= budget {
        return;
    }
    for key in drop_order {
        if total <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| !s.required && s.key == *key) {
            total = total.saturating_sub(sections[idx].render_len());
            sections.remove(idx);
        }
    }
    if total <= budget || sections.is_empty() {
        return;
    }
    let last_idx = sections.len() - 1;
    let other_len: usize = sections[..last_idx].iter().map(Section::render_len).sum();
    let allowed = budget.saturating_sub(other_len);
    sections[last_idx].truncate_to(allowed);
}

fn render(sections: &[Section]) -> String {
    let mut buf = String::new();
    for section in sections {
        buf.push_str(&section.render());
        buf.push('\n');
    }
    buf
}

/// Feedback reconstructed from the previous attempt's failure (§4.5 step 1b):
/// test output excerpt, review rejection reason, or both.
#[derive(Debug, Clone, Default)]
pub struct AttemptFeedback {
    pub test_output: Option<String>,
    pub review_reason: Option<String>,
}

/// Build the IMPLEMENT prompt (§4.5): task description, feedback from the
/// prior attempt when retrying, and the test commands verbatim.
pub fn build_implement_prompt(node: &TaskNode, feedback: Option<&AttemptFeedback>, budget_bytes: usize) -> String {
    let mut sections = vec![
        Section::required("contract", "Implement Contract", IMPLEMENT_CONTRACT),
        Section::required("task", "Task", render_task(node)),
    ];

    if let Some(feedback) = feedback {
        if let Some(reason) = &feedback.review_reason {
            sections.push(Section::droppable(
                "review_feedback",
                "Previous Review Rejection",
                reason.clone(),
            ));
        }
        if let Some(output) = &feedback.test_output {
            sections.push(Section::droppable(
                "test_feedback",
                "Previous Test Failure",
                output.clone(),
            ));
        }
    }

    let drop_order = ["test_feedback", "review_feedback"];
    apply_budget(&mut sections, budget_bytes, &drop_order);
    render(&sections)
}

/// Build the REVIEW prompt (§4.5): task description, the diff introduced by
/// this attempt, and the verdict-token instruction.
pub fn build_review_prompt(node: &TaskNode, diff: &str, budget_bytes: usize) -> String {
    let mut sections = vec![
        Section::required("task", "Task", render_task(node)),
        Section::droppable("diff", "Diff", diff.to_string()),
        Section::required("contract", "Review Contract", REVIEW_CONTRACT),
    ];
    apply_budget(&mut sections, budget_bytes, &["diff"]);
    render(&sections)
}

/// Extract a verdict from a REVIEW runner's output (§4.5 step 2: the final
/// `APPROVED`/`REJECTED: <reason>` line). Defaults to rejection with a
/// generic reason when no verdict line is found, since an unparseable
/// review must not be silently treated as approval.
pub fn parse_review_verdict(output: &str) -> (bool, Option<String>) {
    for line in output.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("APPROVED") {
            return (true, None);
        }
        if let Some(reason) = line
            .strip_prefix("REJECTED:")
            .or_else(|| line.strip_prefix("REJECTED :"))
        {
            return (false, Some(reason.trim().to_string()));
        }
        break;
    }
    (false, Some("no verdict line found in review output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::single_leaf_tree;

    fn leaf() -> TaskNode {
        let tree = single_leaf_tree("spec-1", "main", "leaf-a", "phase-1");
        tree.node("leaf-a").unwrap().clone()
    }

    #[test]
    fn implement_prompt_includes_task_and_contract() {
        let prompt = build_implement_prompt(&leaf(), None, 10_000);
        assert!(prompt.contains("Implement Contract"));
        assert!(prompt.contains("leaf-a"));
    }

    #[test]
    fn implement_prompt_includes_feedback_on_retry() {
        let feedback = AttemptFeedback {
            test_output: Some("AssertionError: expected 2 got 1".to_string()),
            review_reason: None,
        };
        let prompt = build_implement_prompt(&leaf(), Some(&feedback), 10_000);
        assert!(prompt.contains("Previous Test Failure"));
        assert!(prompt.contains("AssertionError"));
    }

    #[test]
    fn budget_drops_feedback_before_task() {
        let feedback = AttemptFeedback {
            test_output: Some("x".repeat(5_000)),
            review_reason: Some("y".repeat(5_000)),
        };
        let prompt = build_implement_prompt(&leaf(), Some(&feedback), 200);
        assert!(prompt.contains("Task"));
        assert!(!prompt.contains("Previous Test Failure"));
        assert!(!prompt.contains("Previous Review Rejection"));
    }

    #[test]
    fn review_prompt_truncates_oversized_diff() {
        let diff = "+line\n".repeat(10_000);
        let prompt = build_review_prompt(&leaf(), &diff, 500);
        assert!(prompt.len() < diff.len());
        assert!(prompt.contains("Review Contract"));
    }

    #[test]
    fn verdict_approved_is_recognized() {
        let (approved, reason) = parse_review_verdict("looks solid\nAPPROVED");
        assert!(approved);
        assert!(reason.is_none());
    }

    #[test]
    fn verdict_rejected_carries_reason() {
        let (approved, reason) = parse_review_verdict("missing edge case\nREJECTED: no null check");
        assert!(!approved);
        assert_eq!(reason.unwrap(), "no null check");
    }

    #[test]
    fn missing_verdict_defaults_to_rejected() {
        let (approved, reason) = parse_review_verdict("the runner rambled without a verdict");
        assert!(!approved);
        assert!(reason.is_some());
    }
}
