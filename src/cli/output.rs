//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Map domain errors to a message for stderr.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::InvalidArgument(msg) => format!("error: {}\nRun with --help for usage.", msg),
        ApiError::ConfigError(msg) => format!("configuration error: {}", msg),
        ApiError::StorageError(err) => format!("store error: {}", err),
        ApiError::SyncError(err) => format!("sync error: {}", err),
    }
}
