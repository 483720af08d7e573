//! Bidirectional tree sync with a remote store.
//!
//! - [`engine`]: hash-guided tree walk and point merge
//! - [`link`]: per-peer connection supervisor and event loop
//! - [`manager`]: one link per `sync` node
//! - [`config`]: link settings and process-wide defaults

pub mod config;
pub mod engine;
pub mod link;
pub mod manager;

pub use config::{ConfigChange, SyncDefaults, SyncLinkConfig};
pub use engine::{diff_points, SyncEngine, SyncStats};
pub use link::{LinkContext, LinkState, SyncLink};
pub use manager::SyncManager;
