//! Node graph store
//!
//! Nodes and edges are persisted in sled. Every mutation runs inside a
//! [`UnitOfWork`] that applies the points, recomputes hashes up to every
//! ancestor and commits everything in one transaction.

pub mod mutation;
pub mod persistence;
pub mod query;
pub mod txn;
pub mod verify;

pub use mutation::{ApplyOutcome, TouchedEdge};
pub use persistence::{SledStore, SCHEMA_VERSION};
pub use query::NodeFilter;
pub use txn::UnitOfWork;
pub use verify::{HashMismatch, VerifyReport};
