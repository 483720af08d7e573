//! Edgesync: hash-tree node graph store with bidirectional tree sync
//!
//! Nodes hold timestamped points and are connected by edges that carry their
//! own points and a hash summarizing everything below them. Two stores
//! reconcile over a pub/sub bus by walking their trees and descending only
//! where hashes differ.

pub mod bus;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod point;
pub mod service;
pub mod store;
pub mod subject;
pub mod sync;
pub mod tree;
pub mod types;
