//! NodeEdge queries against the store.

use crate::error::StoreError;
use crate::node::{Edge, Node, NodeEdge};
use crate::store::persistence::Trees;
use crate::store::SledStore;
use crate::tree::hasher::compute_hash;
use crate::types::{NodeID, MAX_TREE_DEPTH, PARENT_NONE, ROOT_PARENT, SELECT_ALL};
use std::collections::BTreeSet;

/// Optional restrictions applied to a NodeEdge query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Only return nodes of this type.
    pub typ: Option<String>,
    /// Include nodes reached through tombstoned edges.
    pub include_deleted: bool,
}

impl NodeFilter {
    pub fn including_deleted() -> Self {
        Self {
            typ: None,
            include_deleted: true,
        }
    }

    pub fn of_type(typ: impl Into<String>) -> Self {
        Self {
            typ: Some(typ.into()),
            include_deleted: false,
        }
    }

    fn accepts_node(&self, node: &Node) -> bool {
        self.typ.as_deref().map_or(true, |t| t == node.typ)
    }

    fn accepts_edge(&self, edge: &Edge) -> bool {
        self.include_deleted || !edge.is_tombstone()
    }
}

impl SledStore {
    /// Fetch NodeEdges.
    ///
    /// `parent` is a node ID, `all` (one NodeEdge per up-edge of `id`),
    /// `none` (detached view, no edge points, hash without edge contribution)
    /// or `root` (the root's sentinel parent). `id` is a node ID, `all` (every
    /// child of `parent`) or `root`. Unknown nodes yield an empty list.
    pub fn get_nodes(
        &self,
        parent: &str,
        id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeEdge>, StoreError> {
        let _guard = self.lock.read();
        let trees = &self.trees;

        let id = if id == ROOT_PARENT {
            match trees.root_id()? {
                Some(root) => root,
                None => return Ok(Vec::new()),
            }
        } else {
            id.to_string()
        };

        if parent == SELECT_ALL && id == SELECT_ALL {
            return Err(StoreError::InvalidQuery(
                "parent and id cannot both be 'all'".to_string(),
            ));
        }

        if parent == PARENT_NONE {
            if id == SELECT_ALL {
                return Err(StoreError::InvalidQuery(
                    "a detached query needs a node ID".to_string(),
                ));
            }
            return Ok(detached(trees, &id, filter)?.into_iter().collect());
        }

        let edges = if id == SELECT_ALL {
            trees.child_edges(parent)?
        } else if parent == SELECT_ALL {
            trees.up_edges(&id)?
        } else {
            trees
                .up_edges(&id)?
                .into_iter()
                .filter(|e| e.up == parent)
                .collect()
        };

        let mut result = Vec::with_capacity(edges.len());
        for edge in edges {
            if !filter.accepts_edge(&edge) {
                continue;
            }
            let Some(node) = trees.node(&edge.down)? else {
                tracing::warn!(node = %edge.down, edge = %edge.id, "Edge points to a missing node");
                continue;
            };
            if filter.accepts_node(&node) {
                result.push(node.to_node_edge(&edge));
            }
        }
        Ok(result)
    }

    /// One NodeEdge for `(parent, id)`, if present.
    pub fn get_node(&self, parent: &str, id: &str) -> Result<Option<NodeEdge>, StoreError> {
        Ok(self
            .get_nodes(parent, id, &NodeFilter::including_deleted())?
            .into_iter()
            .next())
    }

    /// Every node above `id`, nearest first, excluding the root sentinel.
    pub fn ancestors(&self, id: &str) -> Result<Vec<NodeID>, StoreError> {
        let _guard = self.lock.read();
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        let mut frontier = vec![id.to_string()];
        let mut depth = 0usize;

        while !frontier.is_empty() {
            if depth > MAX_TREE_DEPTH {
                return Err(StoreError::DepthExceeded {
                    node: id.to_string(),
                    limit: MAX_TREE_DEPTH,
                });
            }
            let mut next = Vec::new();
            for node in &frontier {
                for edge in self.trees.up_edges(node)? {
                    if edge.up != ROOT_PARENT && seen.insert(edge.up.clone()) {
                        ordered.push(edge.up.clone());
                        next.push(edge.up);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(ordered)
    }
}

fn detached(trees: &Trees, id: &str, filter: &NodeFilter) -> Result<Option<NodeEdge>, StoreError> {
    let Some(node) = trees.node(id)? else {
        return Ok(None);
    };
    if !filter.accepts_node(&node) {
        return Ok(None);
    }
    let down = trees.child_edges(id)?;
    let hash = compute_hash(None, &node.points, &down);
    Ok(Some(NodeEdge {
        id: node.id,
        typ: node.typ,
        parent: PARENT_NONE.to_string(),
        points: node.points,
        edge_points: Default::default(),
        hash,
    }))
}
