//! Sled persistence for nodes, edges and their adjacency indexes

use crate::error::StoreError;
use crate::node::{Edge, Node};
use crate::types::{EdgeID, NodeID};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

const TREE_NODES: &str = "nodes";
const TREE_EDGES: &str = "edges";
const TREE_EDGES_BY_UP: &str = "edges_by_up";
const TREE_EDGES_BY_DOWN: &str = "edges_by_down";
const TREE_META: &str = "meta";

pub(crate) const META_ROOT_ID: &[u8] = b"root_id";
pub(crate) const META_VERSION: &[u8] = b"version";

/// On-disk layout version.
pub const SCHEMA_VERSION: u32 = 1;

/// Handles to every sled tree the store uses.
///
/// `edges_by_up` maps a node to the IDs of its child edges, `edges_by_down`
/// maps a node to the IDs of its up-edges.
#[derive(Clone)]
pub(crate) struct Trees {
    pub nodes: Tree,
    pub edges: Tree,
    pub edges_by_up: Tree,
    pub edges_by_down: Tree,
    pub meta: Tree,
}

impl Trees {
    fn open(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            nodes: db.open_tree(TREE_NODES)?,
            edges: db.open_tree(TREE_EDGES)?,
            edges_by_up: db.open_tree(TREE_EDGES_BY_UP)?,
            edges_by_down: db.open_tree(TREE_EDGES_BY_DOWN)?,
            meta: db.open_tree(TREE_META)?,
        })
    }

    pub fn node(&self, id: &str) -> Result<Option<Node>, StoreError> {
        self.nodes
            .get(id.as_bytes())?
            .map(|raw| decode(&raw))
            .transpose()
    }

    pub fn edge(&self, id: &str) -> Result<Option<Edge>, StoreError> {
        self.edges
            .get(id.as_bytes())?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// IDs of the edges whose `up` is `node`.
    pub fn child_edge_ids(&self, node: &str) -> Result<Vec<EdgeID>, StoreError> {
        read_ids(&self.edges_by_up, node)
    }

    /// IDs of the edges whose `down` is `node`.
    pub fn up_edge_ids(&self, node: &str) -> Result<Vec<EdgeID>, StoreError> {
        read_ids(&self.edges_by_down, node)
    }

    pub fn child_edges(&self, node: &str) -> Result<Vec<Edge>, StoreError> {
        self.load_edges(self.child_edge_ids(node)?)
    }

    pub fn up_edges(&self, node: &str) -> Result<Vec<Edge>, StoreError> {
        self.load_edges(self.up_edge_ids(node)?)
    }

    fn load_edges(&self, ids: Vec<EdgeID>) -> Result<Vec<Edge>, StoreError> {
        let mut edges = Vec::with_capacity(ids.len());
        for id in ids {
            match self.edge(&id)? {
                Some(edge) => edges.push(edge),
                None => {
                    tracing::warn!(edge = %id, "Edge index references a missing edge");
                }
            }
        }
        Ok(edges)
    }

    pub fn root_id(&self) -> Result<Option<NodeID>, StoreError> {
        self.meta
            .get(META_ROOT_ID)?
            .map(|raw| {
                String::from_utf8(raw.to_vec())
                    .map_err(|e| StoreError::Encoding(format!("root id is not utf-8: {}", e)))
            })
            .transpose()
    }

    pub fn all_edges(&self) -> Result<Vec<Edge>, StoreError> {
        let mut edges = Vec::new();
        for item in self.edges.iter() {
            let (_, value) = item?;
            edges.push(decode(&value)?);
        }
        Ok(edges)
    }

    pub fn all_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let mut nodes = Vec::new();
        for item in self.nodes.iter() {
            let (_, value) = item?;
            nodes.push(decode(&value)?);
        }
        Ok(nodes)
    }
}

fn read_ids(tree: &Tree, node: &str) -> Result<Vec<EdgeID>, StoreError> {
    match tree.get(node.as_bytes())? {
        Some(raw) => decode(&raw),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Encoding(format!("Failed to serialize: {}", e)))
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(raw).map_err(|e| StoreError::Encoding(format!("Failed to deserialize: {}", e)))
}

/// Sled-backed node graph store.
///
/// Writers are serialized through a single-writer lock held for the whole
/// unit of work; readers take the shared side so they never observe a
/// half-applied commit.
pub struct SledStore {
    db: Db,
    pub(crate) trees: Trees,
    pub(crate) lock: RwLock<()>,
}

impl SledStore {
    /// Open (or create) a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store that is discarded on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let trees = Trees::open(&db)?;
        match trees.meta.get(META_VERSION)? {
            Some(raw) => {
                let version: u32 = decode(&raw)?;
                if version != SCHEMA_VERSION {
                    return Err(StoreError::Encoding(format!(
                        "Unsupported store version {} (expected {})",
                        version, SCHEMA_VERSION
                    )));
                }
            }
            None => {
                trees.meta.insert(META_VERSION, encode(&SCHEMA_VERSION)?)?;
            }
        }
        Ok(Self {
            db,
            trees,
            lock: RwLock::new(()),
        })
    }

    /// ID of the designated root node, if any node exists yet.
    pub fn root_id(&self) -> Result<Option<NodeID>, StoreError> {
        let _guard = self.lock.read();
        self.trees.root_id()
    }

    pub fn node(&self, id: &str) -> Result<Option<Node>, StoreError> {
        let _guard = self.lock.read();
        self.trees.node(id)
    }

    pub fn up_edges(&self, id: &str) -> Result<Vec<Edge>, StoreError> {
        let _guard = self.lock.read();
        self.trees.up_edges(id)
    }

    pub fn child_edges(&self, id: &str) -> Result<Vec<Edge>, StoreError> {
        let _guard = self.lock.read();
        self.trees.child_edges(id)
    }

    /// Every node in the store, in key order.
    pub fn nodes(&self) -> Result<Vec<Node>, StoreError> {
        let _guard = self.lock.read();
        self.trees.all_nodes()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
