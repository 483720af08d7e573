//! Nodes, edges and the NodeEdge view exchanged between stores.

use crate::point::{node_type, Points};
use crate::types::{EdgeID, Hash, NodeID, ZERO_HASH};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeID,
    #[serde(rename = "type")]
    pub typ: String,
    pub points: Points,
}

impl Node {
    pub fn new(id: impl Into<NodeID>) -> Self {
        Self {
            id: id.into(),
            typ: node_type::UNCLASSIFIED.to_string(),
            points: Points::new(),
        }
    }

    /// Description if set, otherwise the ID.
    pub fn desc(&self) -> &str {
        self.points.desc().unwrap_or(&self.id)
    }

    /// View this node through one of its up-edges.
    pub fn to_node_edge(&self, edge: &Edge) -> NodeEdge {
        NodeEdge {
            id: self.id.clone(),
            typ: self.typ.clone(),
            parent: edge.up.clone(),
            points: self.points.clone(),
            edge_points: edge.points.clone(),
            hash: edge.hash,
        }
    }
}

/// Directed relation: `down` is a child of `up`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeID,
    pub up: NodeID,
    pub down: NodeID,
    pub points: Points,
    pub hash: Hash,
}

impl Edge {
    pub fn new(up: impl Into<NodeID>, down: impl Into<NodeID>) -> Self {
        let up = up.into();
        let down = down.into();
        Self {
            id: edge_id(&up, &down),
            up,
            down,
            points: Points::new(),
            hash: ZERO_HASH,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.points.is_tombstoned()
    }
}

/// Edge ID derived from the endpoints; every store names a relation the same.
pub fn edge_id(up: &str, down: &str) -> EdgeID {
    let name = format!("{}.{}", up, down);
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// A node seen through one specific edge; the unit compared during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdge {
    pub id: NodeID,
    #[serde(rename = "type")]
    pub typ: String,
    /// Parent ID, or `none` for the detached view.
    pub parent: NodeID,
    pub points: Points,
    #[serde(default)]
    pub edge_points: Points,
    #[serde(with = "hex_hash")]
    pub hash: Hash,
}

impl NodeEdge {
    pub fn is_tombstone(&self) -> bool {
        self.edge_points.is_tombstoned()
    }

    pub fn desc(&self) -> String {
        match self.points.desc() {
            Some(d) => format!("{} ({})", d, self.id),
            None => self.id.clone(),
        }
    }
}

mod hex_hash {
    use crate::types::Hash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("hash must be 32 bytes"))
    }
}
