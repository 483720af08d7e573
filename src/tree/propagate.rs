//! Upward hash propagation inside a unit of work.
//!
//! The ancestor set of the mutated nodes is collected breadth-first, then
//! every up-edge of every node in the set is recomputed in dependency order:
//! a node is processed only after all of its in-set children, so each edge is
//! recomputed once even when the ancestry is diamond shaped.

use crate::error::StoreError;
use crate::store::UnitOfWork;
use crate::tree::hasher::compute_hash;
use crate::types::{NodeID, MAX_TREE_DEPTH, ROOT_PARENT};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

/// Recompute the hashes of `start` and all of their ancestors.
///
/// Returns the number of edges rewritten.
pub fn propagate(uow: &mut UnitOfWork<'_>, start: &[NodeID]) -> Result<usize, StoreError> {
    let affected = collect_ancestors(uow, start)?;

    // pending[n] = number of in-set child edges not yet recomputed
    let mut pending: BTreeMap<NodeID, usize> = BTreeMap::new();
    for id in &affected {
        let mut count = 0;
        for edge in uow.child_edges(id)? {
            if affected.contains(&edge.down) {
                count += 1;
            }
        }
        pending.insert(id.clone(), count);
    }

    let mut ready: VecDeque<NodeID> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let root_id = uow.root_id()?;
    let mut processed = 0usize;
    let mut rewritten = 0usize;

    while let Some(id) = ready.pop_front() {
        processed += 1;
        let up_edges = uow.up_edges(&id)?;

        if up_edges.is_empty() {
            if root_id.as_deref() != Some(id.as_str()) {
                warn!(node = %id, "Integrity anomaly: non-root node has no up-edges");
            }
            continue;
        }

        let node_points = uow.node(&id)?.map(|n| n.points).unwrap_or_default();
        let down_edges = uow.child_edges(&id)?;

        for mut edge in up_edges {
            let hash = compute_hash(Some(&edge.points), &node_points, &down_edges);
            if hash != edge.hash {
                edge.hash = hash;
                rewritten += 1;
                uow.put_edge(edge.clone());
            }

            if let Some(count) = pending.get_mut(&edge.up) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(edge.up.clone());
                }
            }
        }
    }

    if processed < affected.len() {
        let stuck = pending
            .into_iter()
            .find(|(_, count)| *count > 0)
            .map(|(id, _)| id)
            .unwrap_or_default();
        return Err(StoreError::Cycle(stuck));
    }

    debug!(
        nodes = processed,
        edges = rewritten,
        "Propagated hashes"
    );
    Ok(rewritten)
}

/// `start` plus every node reachable by walking up-edges, bounded in depth.
fn collect_ancestors(
    uow: &mut UnitOfWork<'_>,
    start: &[NodeID],
) -> Result<BTreeSet<NodeID>, StoreError> {
    let mut seen: BTreeSet<NodeID> = start.iter().cloned().collect();
    let mut frontier: Vec<NodeID> = start.to_vec();
    let mut depth = 0usize;

    while !frontier.is_empty() {
        if depth > MAX_TREE_DEPTH {
            return Err(StoreError::DepthExceeded {
                node: start.first().cloned().unwrap_or_default(),
                limit: MAX_TREE_DEPTH,
            });
        }

        let mut next = Vec::new();
        for id in &frontier {
            for edge in uow.up_edges(id)? {
                if edge.up == ROOT_PARENT {
                    continue;
                }
                if seen.insert(edge.up.clone()) {
                    next.push(edge.up);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(seen)
}
