//! Unit of work: an ID-keyed cache of nodes, edges and adjacency lists that
//! is written back to sled in a single multi-tree transaction.
//!
//! Every entity is read from disk at most once per unit of work and written at
//! most once, at commit. Dropping a unit of work without committing discards
//! all of its changes.

use crate::error::StoreError;
use crate::node::{Edge, Node};
use crate::store::persistence::{encode, Trees, META_ROOT_ID};
use crate::store::SledStore;
use crate::types::{EdgeID, NodeID};
use parking_lot::RwLockWriteGuard;
use sled::transaction::{TransactionResult, Transactional};
use std::collections::{BTreeSet, HashMap};

pub struct UnitOfWork<'a> {
    trees: &'a Trees,
    _guard: RwLockWriteGuard<'a, ()>,
    nodes: HashMap<NodeID, Node>,
    edges: HashMap<EdgeID, Edge>,
    child_ids: HashMap<NodeID, Vec<EdgeID>>,
    up_ids: HashMap<NodeID, Vec<EdgeID>>,
    dirty_nodes: BTreeSet<NodeID>,
    dirty_edges: BTreeSet<EdgeID>,
    dirty_child_ids: BTreeSet<NodeID>,
    dirty_up_ids: BTreeSet<NodeID>,
    root_id: Option<Option<NodeID>>,
    root_dirty: bool,
}

impl SledStore {
    /// Begin a unit of work, taking the single-writer lock until it is
    /// committed or dropped.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            trees: &self.trees,
            _guard: self.lock.write(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            child_ids: HashMap::new(),
            up_ids: HashMap::new(),
            dirty_nodes: BTreeSet::new(),
            dirty_edges: BTreeSet::new(),
            dirty_child_ids: BTreeSet::new(),
            dirty_up_ids: BTreeSet::new(),
            root_id: None,
            root_dirty: false,
        }
    }
}

impl<'a> UnitOfWork<'a> {
    pub fn node(&mut self, id: &str) -> Result<Option<Node>, StoreError> {
        if let Some(node) = self.nodes.get(id) {
            return Ok(Some(node.clone()));
        }
        let loaded = self.trees.node(id)?;
        if let Some(node) = &loaded {
            self.nodes.insert(id.to_string(), node.clone());
        }
        Ok(loaded)
    }

    pub fn put_node(&mut self, node: Node) {
        self.dirty_nodes.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn edge(&mut self, id: &str) -> Result<Option<Edge>, StoreError> {
        if let Some(edge) = self.edges.get(id) {
            return Ok(Some(edge.clone()));
        }
        let loaded = self.trees.edge(id)?;
        if let Some(edge) = &loaded {
            self.edges.insert(id.to_string(), edge.clone());
        }
        Ok(loaded)
    }

    /// Replace an edge that is already indexed.
    pub fn put_edge(&mut self, edge: Edge) {
        self.dirty_edges.insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
    }

    /// Add a brand-new edge and index it on both ends.
    pub fn insert_edge(&mut self, edge: Edge) -> Result<(), StoreError> {
        self.child_edge_ids(&edge.up)?;
        self.up_edge_ids(&edge.down)?;
        if let Some(ids) = self.child_ids.get_mut(&edge.up) {
            ids.push(edge.id.clone());
        }
        if let Some(ids) = self.up_ids.get_mut(&edge.down) {
            ids.push(edge.id.clone());
        }
        self.dirty_child_ids.insert(edge.up.clone());
        self.dirty_up_ids.insert(edge.down.clone());
        self.put_edge(edge);
        Ok(())
    }

    pub fn child_edge_ids(&mut self, node: &str) -> Result<Vec<EdgeID>, StoreError> {
        if let Some(ids) = self.child_ids.get(node) {
            return Ok(ids.clone());
        }
        let ids = self.trees.child_edge_ids(node)?;
        self.child_ids.insert(node.to_string(), ids.clone());
        Ok(ids)
    }

    pub fn up_edge_ids(&mut self, node: &str) -> Result<Vec<EdgeID>, StoreError> {
        if let Some(ids) = self.up_ids.get(node) {
            return Ok(ids.clone());
        }
        let ids = self.trees.up_edge_ids(node)?;
        self.up_ids.insert(node.to_string(), ids.clone());
        Ok(ids)
    }

    pub fn child_edges(&mut self, node: &str) -> Result<Vec<Edge>, StoreError> {
        let ids = self.child_edge_ids(node)?;
        self.load_edges(&ids)
    }

    pub fn up_edges(&mut self, node: &str) -> Result<Vec<Edge>, StoreError> {
        let ids = self.up_edge_ids(node)?;
        self.load_edges(&ids)
    }

    fn load_edges(&mut self, ids: &[EdgeID]) -> Result<Vec<Edge>, StoreError> {
        let mut edges = Vec::with_capacity(ids.len());
        for id in ids {
            match self.edge(id)? {
                Some(edge) => edges.push(edge),
                None => tracing::warn!(edge = %id, "Edge index references a missing edge"),
            }
        }
        Ok(edges)
    }

    /// The edge from `up` to `down`, if one exists (tombstoned or not).
    pub fn find_edge(&mut self, up: &str, down: &str) -> Result<Option<Edge>, StoreError> {
        Ok(self.up_edges(down)?.into_iter().find(|e| e.up == up))
    }

    pub fn root_id(&mut self) -> Result<Option<NodeID>, StoreError> {
        if let Some(root) = &self.root_id {
            return Ok(root.clone());
        }
        let root = self.trees.root_id()?;
        self.root_id = Some(root.clone());
        Ok(root)
    }

    pub fn set_root_id(&mut self, id: &str) {
        self.root_id = Some(Some(id.to_string()));
        self.root_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_nodes.is_empty()
            || !self.dirty_edges.is_empty()
            || !self.dirty_child_ids.is_empty()
            || !self.dirty_up_ids.is_empty()
            || self.root_dirty
    }

    /// Write every dirty entity in one sled transaction across all trees.
    pub fn commit(self) -> Result<(), StoreError> {
        if !self.is_dirty() {
            return Ok(());
        }

        let nodes = self
            .dirty_nodes
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| Ok((n.id.clone(), encode(n)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let edges = self
            .dirty_edges
            .iter()
            .filter_map(|id| self.edges.get(id))
            .map(|e| Ok((e.id.clone(), encode(e)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let child_ids = encode_index(&self.dirty_child_ids, &self.child_ids)?;
        let up_ids = encode_index(&self.dirty_up_ids, &self.up_ids)?;
        let root = match (&self.root_id, self.root_dirty) {
            (Some(Some(id)), true) => Some(id.clone()),
            _ => None,
        };

        let trees = self.trees;
        let result: TransactionResult<(), StoreError> = (
            &trees.nodes,
            &trees.edges,
            &trees.edges_by_up,
            &trees.edges_by_down,
            &trees.meta,
        )
            .transaction(|(tx_nodes, tx_edges, tx_up, tx_down, tx_meta)| {
                for (key, value) in &nodes {
                    tx_nodes.insert(key.as_bytes(), value.as_slice())?;
                }
                for (key, value) in &edges {
                    tx_edges.insert(key.as_bytes(), value.as_slice())?;
                }
                for (key, value) in &child_ids {
                    tx_up.insert(key.as_bytes(), value.as_slice())?;
                }
                for (key, value) in &up_ids {
                    tx_down.insert(key.as_bytes(), value.as_slice())?;
                }
                if let Some(root) = &root {
                    tx_meta.insert(META_ROOT_ID, root.as_bytes())?;
                }
                Ok(())
            });

        result?;
        tracing::trace!(
            nodes = nodes.len(),
            edges = edges.len(),
            "Committed unit of work"
        );
        Ok(())
    }
}

fn encode_index(
    dirty: &BTreeSet<NodeID>,
    index: &HashMap<NodeID, Vec<EdgeID>>,
) -> Result<Vec<(NodeID, Vec<u8>)>, StoreError> {
    dirty
        .iter()
        .filter_map(|id| index.get(id).map(|ids| (id, ids)))
        .map(|(id, ids)| Ok((id.clone(), encode(ids)?)))
        .collect()
}
