//! Dependency stack construction for an agent's action graph.
//!
//! Any error here is structural: the graph itself cannot be executed, so
//! callers treat it as fatal rather than as a failed action.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One node of the action graph, as seen by the stack builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionNode {
    pub id: String,
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    DuplicateAction(String),
    UnknownTarget(String),
    UnknownDependency { action: String, missing: String },
    Cycle(Vec<String>),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAction(id) => write!(f, "duplicate action id '{id}'"),
            Self::UnknownTarget(id) => write!(f, "target action '{id}' is not defined"),
            Self::UnknownDependency { action, missing } => {
                write!(f, "action '{action}' requires undefined action '{missing}'")
            }
            Self::Cycle(path) => write!(f, "dependency cycle: {}", path.join(" -> ")),
        }
    }
}

impl std::error::Error for GraphError {}

/// Order the actions reachable from `target` so that every dependency runs
/// before its dependents. Each action appears once; `target` is last.
///
/// Dependencies are visited in declaration order, so the result is stable for
/// a given manifest.
pub fn dependency_stack(nodes: &[ActionNode], target: &str) -> Result<Vec<String>, GraphError> {
    let mut by_id: BTreeMap<&str, &ActionNode> = BTreeMap::new();
    for node in nodes {
        if by_id.insert(node.id.as_str(), node).is_some() {
            return Err(GraphError::DuplicateAction(node.id.clone()));
        }
    }
    if !by_id.contains_key(target) {
        return Err(GraphError::UnknownTarget(target.to_string()));
    }

    let mut stack = Vec::new();
    let mut done = BTreeSet::new();
    let mut visiting = Vec::new();
    visit(target, &by_id, &mut visiting, &mut done, &mut stack)?;
    Ok(stack)
}

fn visit<'a>(
    id: &'a str,
    by_id: &BTreeMap<&'a str, &'a ActionNode>,
    visiting: &mut Vec<&'a str>,
    done: &mut BTreeSet<&'a str>,
    stack: &mut Vec<String>,
) -> Result<(), GraphError> {
    if done.contains(id) {
        return Ok(());
    }
    if let Some(start) = visiting.iter().position(|v| *v == id) {
        let mut path: Vec<String> = visiting[start..].iter().map(|s| s.to_string()).collect();
        path.push(id.to_string());
        return Err(GraphError::Cycle(path));
    }

    let node = by_id[id];
    visiting.push(id);
    for dep in &node.requires {
        let Some((&dep_id, _)) = by_id.get_key_value(dep.as_str()) else {
            return Err(GraphError::UnknownDependency {
                action: id.to_string(),
                missing: dep.clone(),
            });
        };
        visit(dep_id, by_id, visiting, done, stack)?;
    }
    visiting.pop();

    done.insert(id);
    stack.push(id.to_string());
    Ok(())
}
