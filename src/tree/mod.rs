//! Hash tree
//!
//! Every edge carries the hash of the node it points to, as seen through that
//! edge. A node's hash covers its own point times and the hashes of all of its
//! down-edges, so any change anywhere below a node changes the node's hash.

pub mod hasher;
pub mod propagate;
