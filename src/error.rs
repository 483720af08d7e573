//! Error types for the node graph store and its synchronization layer.

use crate::types::NodeID;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeID),

    #[error("Edge not found: {up} -> {down}")]
    EdgeNotFound { up: NodeID, down: NodeID },

    #[error("Root node cannot be tombstoned")]
    RootTombstone,

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    #[error("Invalid node ID: {0:?}")]
    InvalidId(String),

    #[error("Tree depth limit of {limit} exceeded walking from node {node}")]
    DepthExceeded { node: NodeID, limit: usize },

    #[error("Cycle detected in ancestry of node {0}")]
    Cycle(NodeID),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Hash mismatch on edge {edge}: stored {stored}, computed {computed}")]
    HashMismatch {
        edge: String,
        stored: String,
        computed: String,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(err: sled::transaction::TransactionError<StoreError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => StoreError::Database(e),
        }
    }
}

/// Malformed payload on the wire.
#[derive(Debug, Error)]
#[error("Malformed payload: {0}")]
pub struct CodecError(pub String);

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError(err.to_string())
    }
}

/// Pub/sub transport errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Request on {0} timed out")]
    Timeout(String),

    #[error("No responders for {0}")]
    NoResponders(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    Disconnected,

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}

/// Errors fetching or sending nodes through a bus connection
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Request on {0} timed out")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode reply from {subject}: {reason}")]
    Decode { subject: String, reason: String },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Bus error: {0}")]
    Bus(BusError),
}

impl From<BusError> for AccessError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(subject) => AccessError::Timeout(subject),
            other => AccessError::Bus(other),
        }
    }
}

impl AccessError {
    /// Timeouts and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::Timeout(_) | AccessError::Bus(_))
    }
}

/// Sync engine errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync link is not connected")]
    NotConnected,

    #[error("Sync link stopped")]
    Stopped,

    #[error("Node {0} not found on either side")]
    Missing(NodeID),

    #[error("Sync depth limit of {limit} exceeded at node {node}")]
    DepthExceeded { node: NodeID, limit: usize },

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Application-level errors (configuration, logging, process wiring)
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
