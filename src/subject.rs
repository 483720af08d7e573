//! Bus subject naming
//!
//! - `p.<node>`: node point batches
//! - `p.<node>.<parent>`: edge point batches
//! - `nodes.<parent>.<node>`: NodeEdge fetch (request/reply)
//! - `up.<ancestor>.<node>.<parent>`: edge changes fanned out to ancestors
//!
//! Subjects are dot separated tokens. A `*` token matches exactly one token,
//! a trailing `>` matches one or more.

use crate::types::{PARENT_NONE, ROOT_PARENT, SELECT_ALL};

pub const ALL_NODE_POINTS: &str = "p.*";
pub const ALL_EDGE_POINTS: &str = "p.*.*";
pub const ALL_NODE_REQUESTS: &str = "nodes.*.*";

pub fn node_points(id: &str) -> String {
    format!("p.{}", id)
}

pub fn edge_points(id: &str, parent: &str) -> String {
    format!("p.{}.{}", id, parent)
}

pub fn nodes(parent: &str, id: &str) -> String {
    format!("nodes.{}.{}", parent, id)
}

pub fn up_edge(ancestor: &str, id: &str, parent: &str) -> String {
    format!("up.{}.{}.{}", ancestor, id, parent)
}

/// Every edge change under `ancestor`.
pub fn up_edges_under(ancestor: &str) -> String {
    format!("up.{}.*.*", ancestor)
}

/// A parsed subject this crate knows how to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    NodePoints { id: String },
    EdgePoints { id: String, parent: String },
    Nodes { parent: String, id: String },
    UpEdge { ancestor: String, id: String, parent: String },
}

pub fn parse(subject: &str) -> Option<Subject> {
    let tokens: Vec<&str> = subject.split('.').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return None;
    }
    match tokens.as_slice() {
        ["p", id] => Some(Subject::NodePoints { id: id.to_string() }),
        ["p", id, parent] => Some(Subject::EdgePoints {
            id: id.to_string(),
            parent: parent.to_string(),
        }),
        ["nodes", parent, id] => Some(Subject::Nodes {
            parent: parent.to_string(),
            id: id.to_string(),
        }),
        ["up", ancestor, id, parent] => Some(Subject::UpEdge {
            ancestor: ancestor.to_string(),
            id: id.to_string(),
            parent: parent.to_string(),
        }),
        _ => None,
    }
}

/// True when `subject` matches `pattern` (which may contain wildcards).
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Node IDs become subject tokens, so they must not contain separators or
/// wildcards, and must not collide with selector sentinels.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != ROOT_PARENT
        && id != PARENT_NONE
        && id != SELECT_ALL
        && !id
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
}
