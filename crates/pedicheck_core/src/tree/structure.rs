//! Structural validation of decision tree versions.
//!
//! # Invariants
//! - Exactly one `ENTRY_GATE`.
//! - Node ids are unique and every successor resolves inside the tree.
//! - The graph is acyclic and every non-outcome node has a successor.
//! - Every string in a node is already whitespace-collapsed, so the canonical
//!   form hashed by `tree::integrity` is the content the engine reads.

use crate::model::decision_tree::{
    normalize_answer, DecisionTree, NodeKind, Predicate, Transition, TreeNode,
};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeValidationError {
    EmptyDiseaseId,
    InvalidVersion(u32),
    InvalidSpecHashFormat(String),
    EmptyTree,
    BlankNodeId,
    DuplicateNodeId(String),
    MissingEntryGate,
    MultipleEntryGates(Vec<String>),
    DanglingSuccessor { node_id: String, target: String },
    DeadEnd(String),
    DuplicateRoute { node_id: String, answer: String },
    BlankAnswerKey(String),
    CycleDetected(String),
    /// A string with leading, trailing or repeated whitespace.
    NonCanonicalText { node_id: String, value: String },
}

impl Display for TreeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDiseaseId => write!(f, "disease id must not be blank"),
            Self::InvalidVersion(version) => {
                write!(f, "tree version must be positive, got {version}")
            }
            Self::InvalidSpecHashFormat(value) => {
                write!(f, "spec hash must be 64 lowercase hex chars, got `{value}`")
            }
            Self::EmptyTree => write!(f, "tree has no nodes"),
            Self::BlankNodeId => write!(f, "node id must not be blank"),
            Self::DuplicateNodeId(id) => write!(f, "duplicate node id: {id}"),
            Self::MissingEntryGate => write!(f, "tree has no ENTRY_GATE node"),
            Self::MultipleEntryGates(ids) => {
                write!(f, "tree has multiple ENTRY_GATE nodes: {}", ids.join(","))
            }
            Self::DanglingSuccessor { node_id, target } => {
                write!(f, "node {node_id} points to unknown node {target}")
            }
            Self::DeadEnd(id) => write!(f, "non-outcome node {id} has no successor"),
            Self::DuplicateRoute { node_id, answer } => {
                write!(f, "node {node_id} routes answer `{answer}` more than once")
            }
            Self::BlankAnswerKey(id) => write!(f, "node {id} has a blank answer key"),
            Self::CycleDetected(id) => write!(f, "cycle detected through node {id}"),
            Self::NonCanonicalText { node_id, value } => {
                write!(f, "node {node_id} has non-canonical whitespace in `{value}`")
            }
        }
    }
}

impl Error for TreeValidationError {}

/// Returns whether `value` is a 64-char lowercase hex digest.
pub fn is_valid_spec_hash(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

/// Validates the graph shape of one tree version.
///
/// Does not check `spec_hash` against the content; see `tree::integrity`.
pub fn validate_tree(tree: &DecisionTree) -> Result<(), TreeValidationError> {
    if tree.disease_id.trim().is_empty() {
        return Err(TreeValidationError::EmptyDiseaseId);
    }
    if tree.version == 0 {
        return Err(TreeValidationError::InvalidVersion(tree.version));
    }
    if !is_valid_spec_hash(&tree.spec_hash) {
        return Err(TreeValidationError::InvalidSpecHashFormat(
            tree.spec_hash.clone(),
        ));
    }
    if tree.nodes.is_empty() {
        return Err(TreeValidationError::EmptyTree);
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tree.nodes.len());
    let mut entry_gates = Vec::new();
    for (position, node) in tree.nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(TreeValidationError::BlankNodeId);
        }
        check_node_text(node)?;
        if index.insert(node.id.as_str(), position).is_some() {
            return Err(TreeValidationError::DuplicateNodeId(node.id.clone()));
        }
        if matches!(node.kind, NodeKind::EntryGate(_)) {
            entry_gates.push(node.id.clone());
        }
    }
    match entry_gates.len() {
        0 => return Err(TreeValidationError::MissingEntryGate),
        1 => {}
        _ => return Err(TreeValidationError::MultipleEntryGates(entry_gates)),
    }

    for node in &tree.nodes {
        if let NodeKind::EntryGate(step) | NodeKind::Question(step) = &node.kind {
            if step.answer_key.trim().is_empty() {
                return Err(TreeValidationError::BlankAnswerKey(node.id.clone()));
            }
            if let Transition::ByAnswer { routes, .. } = &step.next {
                let mut seen = HashSet::new();
                for answer in routes.keys() {
                    if !seen.insert(normalize_answer(answer)) {
                        return Err(TreeValidationError::DuplicateRoute {
                            node_id: node.id.clone(),
                            answer: answer.clone(),
                        });
                    }
                }
            }
        }

        let successors = node.successors();
        if successors.is_empty() && !matches!(node.kind, NodeKind::Outcome(_)) {
            return Err(TreeValidationError::DeadEnd(node.id.clone()));
        }
        for target in successors {
            if !index.contains_key(target) {
                return Err(TreeValidationError::DanglingSuccessor {
                    node_id: node.id.clone(),
                    target: target.to_string(),
                });
            }
        }
    }

    detect_cycle(tree, &index)
}

/// Returns whether `value` equals its trimmed, whitespace-collapsed form.
pub fn is_canonical_text(value: &str) -> bool {
    value.split_whitespace().collect::<Vec<_>>().join(" ") == value
}

fn check_node_text(node: &TreeNode) -> Result<(), TreeValidationError> {
    let mut texts: Vec<&str> = vec![node.id.as_str()];
    match &node.kind {
        NodeKind::EntryGate(step) | NodeKind::Question(step) => {
            texts.push(&step.answer_key);
            texts.push(&step.prompt);
            if let Transition::ByAnswer { routes, .. } = &step.next {
                texts.extend(routes.keys().map(String::as_str));
            }
        }
        NodeKind::Branch(step) => {
            for arm in &step.arms {
                collect_predicate_text(&arm.when, &mut texts);
            }
        }
        NodeKind::Outcome(step) => {
            texts.push(&step.diagnosis);
            texts.extend(step.advice.as_deref());
        }
    }
    texts.extend(node.successors());

    match texts.into_iter().find(|text| !is_canonical_text(text)) {
        Some(value) => Err(TreeValidationError::NonCanonicalText {
            node_id: node.id.clone(),
            value: value.to_string(),
        }),
        None => Ok(()),
    }
}

fn collect_predicate_text<'t>(predicate: &'t Predicate, texts: &mut Vec<&'t str>) {
    match predicate {
        Predicate::AnswerEquals { key, value } => {
            texts.push(key);
            texts.push(value);
        }
        Predicate::All { of } | Predicate::Any { of } => {
            for inner in of {
                collect_predicate_text(inner, texts);
            }
        }
        Predicate::Not { of } => collect_predicate_text(of, texts),
        _ => {}
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn detect_cycle(
    tree: &DecisionTree,
    index: &HashMap<&str, usize>,
) -> Result<(), TreeValidationError> {
    let mut marks = vec![Mark::Unvisited; tree.nodes.len()];

    for start in 0..tree.nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: (node position, next successor to visit).
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InProgress;
        while let Some((position, cursor)) = stack.pop() {
            let successors = tree.nodes[position].successors();
            if cursor == successors.len() {
                marks[position] = Mark::Done;
                continue;
            }
            stack.push((position, cursor + 1));

            let Some(&next) = index.get(successors[cursor]) else {
                continue;
            };
            match marks[next] {
                Mark::InProgress => {
                    return Err(TreeValidationError::CycleDetected(
                        tree.nodes[next].id.clone(),
                    ))
                }
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    stack.push((next, 0));
                }
                Mark::Done => {}
            }
        }
    }
    Ok(())
}
