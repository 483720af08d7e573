//! Mutation applier: merges point batches into nodes and edges.

use crate::error::StoreError;
use crate::node::{Edge, Node};
use crate::point::{point_type, Point, Points};
use crate::store::{SledStore, UnitOfWork};
use crate::subject::is_valid_id;
use crate::tree::propagate::propagate;
use crate::types::{NodeID, PARENT_NONE, ROOT_PARENT};
use chrono::Utc;
use tracing::{debug, info};

/// An edge whose points changed during a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchedEdge {
    pub id: NodeID,
    pub parent: NodeID,
    /// The points that were applied to the edge.
    pub points: Points,
}

/// What a mutation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// The node did not exist before.
    pub created: bool,
    /// Any stored state changed. False means the batch was a no-op.
    pub changed: bool,
    /// Edges created, tombstoned or otherwise updated.
    pub edges: Vec<TouchedEdge>,
}

impl SledStore {
    /// Apply a batch of points to a node, creating it if needed.
    ///
    /// `nodeType` sets the node type, `addParent` / `removeParent` create or
    /// tombstone the up-edge named by the point's text. All other points merge
    /// strict last-write-wins. The first node ever created becomes the root; a
    /// new node without `addParent` is placed under the root.
    pub fn node_points<I>(&self, id: &str, points: I) -> Result<ApplyOutcome, StoreError>
    where
        I: IntoIterator<Item = Point>,
    {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }

        let mut uow = self.begin();
        let mut outcome = ApplyOutcome::default();

        let mut node = match uow.node(id)? {
            Some(node) => node,
            None => {
                outcome.created = true;
                outcome.changed = true;
                Node::new(id)
            }
        };

        let mut directives = Vec::new();
        for point in points {
            match point.typ.as_str() {
                point_type::NODE_TYPE => {
                    if !point.text.is_empty() && node.typ != point.text {
                        node.typ = point.text;
                        outcome.changed = true;
                    }
                }
                point_type::ADD_PARENT | point_type::REMOVE_PARENT => directives.push(point),
                _ => {
                    if node.points.merge(point) {
                        outcome.changed = true;
                    }
                }
            }
        }

        let has_add_parent = directives.iter().any(|p| p.typ == point_type::ADD_PARENT);
        match uow.root_id()? {
            None => {
                uow.set_root_id(id);
                attach(&mut uow, ROOT_PARENT, id, live_tombstone(), &mut outcome)?;
                info!(node = %id, "Designated root node");
            }
            Some(root) if outcome.created && !has_add_parent => {
                attach(&mut uow, &root, id, live_tombstone(), &mut outcome)?;
            }
            Some(_) => {}
        }

        for directive in directives {
            apply_directive(&mut uow, id, directive, &mut outcome)?;
        }

        if !outcome.changed {
            debug!(node = %id, "Point batch was a no-op");
            return Ok(outcome);
        }

        node.points.sort();
        uow.put_node(node);
        propagate(&mut uow, &[id.to_string()])?;
        uow.commit()?;
        Ok(outcome)
    }

    /// Apply a batch of points to the edge from `parent` to `id`.
    ///
    /// A parent of `none` resolves to the root (or to the root's own sentinel
    /// edge when `id` is the root).
    pub fn edge_points<I>(&self, id: &str, parent: &str, points: I) -> Result<ApplyOutcome, StoreError>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut uow = self.begin();

        let parent = if parent == PARENT_NONE {
            match uow.root_id()? {
                Some(root) if root != id => root,
                _ => ROOT_PARENT.to_string(),
            }
        } else {
            parent.to_string()
        };

        let mut edge = uow
            .find_edge(&parent, id)?
            .ok_or_else(|| StoreError::EdgeNotFound {
                up: parent.clone(),
                down: id.to_string(),
            })?;

        let mut applied = Points::new();
        for point in points {
            if point.typ == point_type::NODE_TYPE {
                debug!(node = %id, "Ignoring nodeType point on edge");
                continue;
            }
            if point.typ == point_type::TOMBSTONE && point.as_bool() && edge.up == ROOT_PARENT {
                return Err(StoreError::RootTombstone);
            }
            if edge.points.merge(point.clone()) {
                applied.push(point);
            }
        }

        let mut outcome = ApplyOutcome::default();
        if applied.is_empty() {
            debug!(node = %id, parent = %parent, "Edge point batch was a no-op");
            return Ok(outcome);
        }

        edge.points.sort();
        uow.put_edge(edge);
        propagate(&mut uow, &[id.to_string()])?;
        uow.commit()?;

        outcome.changed = true;
        outcome.edges.push(TouchedEdge {
            id: id.to_string(),
            parent,
            points: applied,
        });
        Ok(outcome)
    }
}

fn live_tombstone() -> Point {
    Point::tombstone(false).at(Utc::now())
}

/// Create a new edge from `parent` to `id` carrying `tombstone`.
fn attach(
    uow: &mut UnitOfWork<'_>,
    parent: &str,
    id: &str,
    tombstone: Point,
    outcome: &mut ApplyOutcome,
) -> Result<(), StoreError> {
    let mut edge = Edge::new(parent, id);
    edge.points.merge(tombstone.clone());
    uow.insert_edge(edge)?;
    outcome.changed = true;
    outcome.edges.push(TouchedEdge {
        id: id.to_string(),
        parent: parent.to_string(),
        points: vec![tombstone].into(),
    });
    Ok(())
}

fn apply_directive(
    uow: &mut UnitOfWork<'_>,
    id: &str,
    directive: Point,
    outcome: &mut ApplyOutcome,
) -> Result<(), StoreError> {
    let parent = directive.text.as_str();
    let deleted = directive.typ == point_type::REMOVE_PARENT;

    if parent == id || (parent != ROOT_PARENT && !is_valid_id(parent)) {
        return Err(StoreError::InvalidEdge(format!(
            "{} cannot use {:?} as a parent",
            id, parent
        )));
    }
    if deleted && parent == ROOT_PARENT {
        return Err(StoreError::RootTombstone);
    }

    let tombstone = Point::tombstone(deleted)
        .at(directive.time)
        .with_origin(directive.origin.clone());

    match uow.find_edge(parent, id)? {
        Some(mut edge) => {
            if edge.points.merge(tombstone.clone()) {
                edge.points.sort();
                uow.put_edge(edge);
                outcome.changed = true;
                outcome.edges.push(TouchedEdge {
                    id: id.to_string(),
                    parent: parent.to_string(),
                    points: vec![tombstone].into(),
                });
            }
            Ok(())
        }
        None if deleted => Err(StoreError::EdgeNotFound {
            up: parent.to_string(),
            down: id.to_string(),
        }),
        None => attach(uow, parent, id, tombstone, outcome),
    }
}
