//! Task tree data structures: the hierarchy of parent/leaf nodes, dependency
//! edges, and the precomputed deterministic execution order over leaves.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::scheduler::{compute_execution_order, leaf_declaration_order};

/// Kind of a configured test command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Unit,
    Integration,
    E2e,
}

impl TestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TestKind::Unit => "unit",
            TestKind::Integration => "integration",
            TestKind::E2e => "e2e",
        }
    }
}

impl std::str::FromStr for TestKind {
    type Err = crate::core::types::UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(TestKind::Unit),
            "integration" => Ok(TestKind::Integration),
            "e2e" => Ok(TestKind::E2e),
            other => Err(crate::core::types::UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single configured test invocation for a task node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    #[serde(rename = "type")]
    pub kind: TestKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A node in the task tree. Immutable once the tree is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub is_leaf: bool,
    #[serde(default)]
    pub test_commands: Vec<TestCommand>,
}

/// The full task tree, as loaded from `task-tree.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTree {
    pub version: String,
    pub spec_id: String,
    pub namespace: String,
    pub root_ids: Vec<String>,
    pub execution_order: Vec<String>,
    pub nodes: BTreeMap<String, TaskNode>,
    /// Leaves in declaration order (§4.1 `Tree.Leaves`), recomputed alongside
    /// `execution_order` by [`TaskTree::validate_and_reorder`]. Not part of
    /// the on-disk `task-tree.json` format.
    #[serde(skip)]
    pub declaration_order: Vec<String>,
}

/// Error produced when a tree violates a structural invariant (§3.1).
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("tree validation failed at {path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

/// Error produced when the tree contains a cycle, in parent or `depends_on` edges.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("cycle detected: {}", chain.join(" -> "))]
pub struct CycleError {
    pub chain: Vec<String>,
}

impl TaskTree {
    /// Validate structural invariants and recompute `execution_order`.
    ///
    /// Called on every load (including the escape-hatch case of a hand-edited
    /// artifact) so that a stale or hand-written `execution_order` field can
    /// never diverge from what the scheduler would compute.
    pub fn validate_and_reorder(mut self) -> Result<Self, ValidationError> {
        validate_structure(&self)?;
        let order = compute_execution_order(&self).map_err(|cycle| ValidationError {
            path: "execution_order".to_string(),
            message: cycle.to_string(),
        })?;
        self.execution_order = order;
        self.declaration_order = leaf_declaration_order(&self);
        Ok(self)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// All leaves in declaration order: a left-to-right depth-first walk of
    /// `root_ids` and each node's `children`, distinct from `ready_leaves`'s
    /// topological `execution_order` (§4.1 `Tree.Leaves` vs `Tree.ReadyLeaves`).
    pub fn leaves(&self) -> Vec<&TaskNode> {
        self.declaration_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Leaves whose `depends_on` is a subset of `completed`, that are not themselves
    /// complete, in `execution_order`.
    pub fn ready_leaves<'a>(&'a self, completed: &std::collections::HashSet<String>) -> Vec<&'a TaskNode> {
        self.execution_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| {
                !completed.contains(&node.id)
                    && node.depends_on.iter().all(|dep| completed.contains(dep))
            })
            .collect()
    }

    /// Canonical branch path for a node: `{namespace}/{spec_id}/{path-from-root}`.
    ///
    /// Distinct from the run branch embedded in protocol-commit subjects.
    pub fn branch_name(&self, node_id: &str) -> Option<String> {
        let path = self.path_from_root(node_id)?;
        Some(format!(
            "{}/{}/{}",
            self.namespace,
            self.spec_id,
            path.join("/")
        ))
    }

    /// The root phase (top-level ancestor) id for a given node.
    pub fn phase_of(&self, node_id: &str) -> Option<&str> {
        let mut current = self.nodes.get(node_id)?;
        while let Some(parent_id) = &current.parent {
            current = self.nodes.get(parent_id)?;
        }
        Some(current.id.as_str())
    }

    fn path_from_root(&self, node_id: &str) -> Option<Vec<String>> {
        let mut path = vec![node_id.to_string()];
        let mut current = self.nodes.get(node_id)?;
        while let Some(parent_id) = &current.parent {
            path.push(parent_id.clone());
            current = self.nodes.get(parent_id)?;
        }
        path.reverse();
        Some(path)
    }
}

fn validate_structure(tree: &TaskTree) -> Result<(), ValidationError> {
    if tree.version != "1" {
        return Err(ValidationError {
            path: "version".to_string(),
            message: format!("unsupported version '{}' (expected '1')", tree.version),
        });
    }

    for root_id in &tree.root_ids {
        require_node(tree, root_id, "root_ids")?;
    }

    for (id, node) in &tree.nodes {
        if &node.id != id {
            return Err(ValidationError {
                path: format!("nodes.{id}.id"),
                message: format!("node key '{id}' does not match node.id '{}'", node.id),
            });
        }
        if node.is_leaf != node.children.is_empty() {
            return Err(ValidationError {
                path: format!("nodes.{id}.is_leaf"),
                message: "is_leaf must equal (children.is_empty())".to_string(),
            });
        }
        if let Some(parent) = &node.parent {
            require_node(tree, parent, &format!("nodes.{id}.parent"))?;
        }
        for child in &node.children {
            require_node(tree, child, &format!("nodes.{id}.children"))?;
        }
        for dep in &node.depends_on {
            require_node(tree, dep, &format!("nodes.{id}.depends_on"))?;
        }
    }

    Ok(())
}

fn require_node(tree: &TaskTree, id: &str, path: &str) -> Result<(), ValidationError> {
    if tree.nodes.contains_key(id) {
        Ok(())
    } else {
        Err(ValidationError {
            path: path.to_string(),
            message: format!("referenced id '{id}' does not exist in nodes"),
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures {
    use super::*;

    /// Build a minimal single-leaf tree for tests: one root phase with one leaf child.
    pub fn single_leaf_tree(spec_id: &str, namespace: &str, leaf_id: &str, phase_id: &str) -> TaskTree {
        let phase = TaskNode {
            id: phase_id.to_string(),
            name: format!("{phase_id} phase"),
            description: String::new(),
            parent: None,
            children: vec![leaf_id.to_string()],
            depends_on: Vec::new(),
            is_leaf: false,
            test_commands: Vec::new(),
        };
        let leaf = TaskNode {
            id: leaf_id.to_string(),
            name: format!("{leaf_id} task"),
            description: format!("Implement {leaf_id}"),
            parent: Some(phase_id.to_string()),
            children: Vec::new(),
            depends_on: Vec::new(),
            is_leaf: true,
            test_commands: vec![TestCommand {
                kind: TestKind::Unit,
                command: "true".to_string(),
                description: None,
            }],
        };
        let mut nodes = BTreeMap::new();
        nodes.insert(phase.id.clone(), phase);
        nodes.insert(leaf.id.clone(), leaf);
        TaskTree {
            version: "1".to_string(),
            spec_id: spec_id.to_string(),
            namespace: namespace.to_string(),
            root_ids: vec![phase_id.to_string()],
            execution_order: vec![leaf_id.to_string()],
            nodes,
            declaration_order: Vec::new(),
        }
        .validate_and_reorder()
        .expect("fixture tree is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn single_leaf_tree_is_ready_with_no_dependencies() {
        let tree = fixtures::single_leaf_tree("spec1", "feature", "T001", "phase1");
        let completed = HashSet::new();
        let ready: Vec<&str> = tree.ready_leaves(&completed).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ready, vec!["T001"]);
    }

    #[test]
    fn branch_name_joins_namespace_spec_and_path() {
        let tree = fixtures::single_leaf_tree("spec1", "feature", "T001", "phase1");
        assert_eq!(
            tree.branch_name("T001").unwrap(),
            "feature/spec1/phase1/T001"
        );
    }

    #[test]
    fn phase_of_leaf_is_its_root_ancestor() {
        let tree = fixtures::single_leaf_tree("spec1", "feature", "T001", "phase1");
        assert_eq!(tree.phase_of("T001"), Some("phase1"));
    }

    #[test]
    fn validate_rejects_unknown_version() {
        let mut tree = fixtures::single_leaf_tree("spec1", "feature", "T001", "phase1");
        tree.version = "2".to_string();
        let err = validate_structure(&tree).unwrap_err();
        assert!(err.message.contains("unsupported version"));
    }

    #[test]
    fn validate_rejects_dangling_reference() {
        let mut tree = fixtures::single_leaf_tree("spec1", "feature", "T001", "phase1");
        tree.nodes.get_mut("T001").unwrap().depends_on = vec!["ghost".to_string()];
        let err = validate_structure(&tree).unwrap_err();
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn ready_leaves_respects_dependencies() {
        let mut tree = fixtures::single_leaf_tree("spec1", "feature", "T002", "phase1");
        let t1 = TaskNode {
            id: "T001".to_string(),
            name: "T001".to_string(),
            description: String::new(),
            parent: Some("phase1".to_string()),
            children: Vec::new(),
            depends_on: Vec::new(),
            is_leaf: true,
            test_commands: Vec::new(),
        };
        tree.nodes.insert(t1.id.clone(), t1);
        tree.nodes.get_mut("phase1").unwrap().children.push("T001".to_string());
        tree.nodes.get_mut("T002").unwrap().depends_on = vec!["T001".to_string()];
        let tree = tree.validate_and_reorder().expect("valid");

        let completed = HashSet::new();
        let ready: Vec<&str> = tree.ready_leaves(&completed).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ready, vec!["T001"]);

        let mut completed = HashSet::new();
        completed.insert("T001".to_string());
        let ready: Vec<&str> = tree.ready_leaves(&completed).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ready, vec!["T002"]);
    }
}
