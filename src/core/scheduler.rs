//! Deterministic leaf ordering: Kahn's algorithm over the `depends_on` DAG,
//! tie-broken by declaration order then lexicographic id.
//!
//! Grounded structurally on the teacher's `core/selector.rs`
//! `leftmost_open_leaf` (depth-first, leftmost-wins selection) and
//! `tree.rs::sort_children`'s `(order, id)` tie-break — generalized from
//! "parent containment order" to an explicit dependency graph, since this
//! tree (unlike the teacher's) carries `depends_on` edges that cross
//! sibling/parent boundaries.

use std::collections::{BTreeMap, VecDeque};

use crate::tree::{CycleError, TaskTree};

/// Compute the full deterministic execution order over leaves.
///
/// Declaration order is a left-to-right, depth-first walk of `root_ids` and
/// each node's `children`. Among nodes whose dependencies are all satisfied
/// at a given step, the one with the smallest declaration index wins; ties
/// in declaration index (which cannot happen for distinct ids in a single
/// walk, but can happen for the synthetic "no declaration" case) fall back
/// to lexicographic id comparison.
pub fn compute_execution_order(tree: &TaskTree) -> Result<Vec<String>, CycleError> {
    let declaration_order = declaration_walk(tree);

    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for id in tree.nodes.keys() {
        indegree.entry(id.as_str()).or_insert(0);
    }
    for (id, node) in &tree.nodes {
        for dep in &node.depends_on {
            *indegree.entry(id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let rank = |id: &str| -> (usize, &str) {
        let idx = declaration_order
            .iter()
            .position(|d| d == id)
            .unwrap_or(usize::MAX);
        (idx, id)
    };

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort_by_key(|id| rank(id));
    let mut queue: VecDeque<&str> = ready.into();

    let mut processed: Vec<&str> = Vec::with_capacity(tree.nodes.len());
    let mut remaining_indegree = indegree.clone();

    while let Some(id) = queue.pop_front() {
        processed.push(id);
        if let Some(deps) = dependents.get(id) {
            let mut newly_ready = Vec::new();
            for &dependent in deps {
                let entry = remaining_indegree.entry(dependent).or_insert(0);
                *entry -= 1;
                if *entry == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_by_key(|id| rank(id));
            let mut merged: Vec<&str> = queue.drain(..).collect();
            merged.extend(newly_ready);
            merged.sort_by_key(|id| rank(id));
            queue = merged.into();
        }
    }

    if processed.len() != tree.nodes.len() {
        let mut remaining: Vec<String> = tree
            .nodes
            .keys()
            .filter(|id| !processed.contains(&id.as_str()))
            .cloned()
            .collect();
        remaining.sort();
        return Err(CycleError { chain: remaining });
    }

    Ok(processed
        .into_iter()
        .filter(|id| tree.nodes.get(*id).is_some_and(|n| n.is_leaf))
        .map(str::to_string)
        .collect())
}

fn declaration_walk(tree: &TaskTree) -> Vec<String> {
    let mut order = Vec::with_capacity(tree.nodes.len());
    for root in &tree.root_ids {
        walk(tree, root, &mut order);
    }
    order
}

/// The declaration order of leaves only: a left-to-right depth-first walk of
/// `root_ids` in the order the tree declares them, filtered to leaf nodes.
/// Distinct from [`compute_execution_order`]'s topological order (§4.1:
/// `Tree.Leaves` vs `Tree.ReadyLeaves`).
pub(crate) fn leaf_declaration_order(tree: &TaskTree) -> Vec<String> {
    declaration_walk(tree)
        .into_iter()
        .filter(|id| tree.nodes.get(id).is_some_and(|n| n.is_leaf))
        .collect()
}

fn walk(tree: &TaskTree, id: &str, order: &mut Vec<String>) {
    if order.iter().any(|seen| seen == id) {
        return;
    }
    order.push(id.to_string());
    if let Some(node) = tree.nodes.get(id) {
        for child in &node.children {
            walk(tree, child, order);
        }
    }
}
