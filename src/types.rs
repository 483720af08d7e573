//! Identifier and digest types shared across the crate.

/// Globally unique, stable node identifier (UUID strings in practice).
pub type NodeID = String;

/// Edge identifier, generated when an edge is first created.
pub type EdgeID = String;

/// BLAKE3 digest of a NodeEdge.
pub type Hash = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];

/// Parent ID carried by the root node's up-edge.
pub const ROOT_PARENT: &str = "root";

/// Parent selector meaning "detached view, no edge information".
pub const PARENT_NONE: &str = "none";

/// Selector meaning "every parent" or "every child" depending on position.
pub const SELECT_ALL: &str = "all";

/// Upper bound on how many levels the upward hash walk and the downward
/// sync walk may visit.
pub const MAX_TREE_DEPTH: usize = 100;

/// Short hex form of a hash for log lines.
pub fn short_hash(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}
