//! Configuration System
//!
//! Layered process configuration: built-in defaults, then the user config
//! file, then `config/edgesync.toml` and `config/{EDGESYNC_ENV}.toml` under
//! the working root, then `EDGESYNC__*` environment variables. Sync links
//! themselves are configured by points on `sync` nodes; this file only holds
//! the process-wide defaults they start from.

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::sync::SyncDefaults;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod user_file;
    pub mod workspace_file;
}

pub use sources::user_file::user_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    /// Defaults for sync links
    #[serde(default)]
    pub sync: SyncDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the sled database
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Bus URI the store service answers on
    #[serde(default = "default_bus_uri")]
    pub bus_uri: String,
}

/// `<data dir>/edgesync/store`, or `.edgesync/store` when no home directory
/// can be determined.
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "edgesync")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".edgesync/store"))
}

fn default_bus_uri() -> String {
    "mem://local".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            bus_uri: default_bus_uri(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Store(String),
    Sync(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
            ValidationError::Sync(msg) => write!(f, "Sync: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::Store("path cannot be empty".to_string()));
        }
        if self.store.bus_uri.is_empty() {
            errors.push(ValidationError::Store("bus_uri cannot be empty".to_string()));
        }

        if self.sync.period_secs == 0 {
            errors.push(ValidationError::Sync("period_secs must be at least 1".to_string()));
        }
        if self.sync.request_timeout_ms == 0 {
            errors.push(ValidationError::Sync(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sync.mailbox_capacity == 0 {
            errors.push(ValidationError::Sync(
                "mailbox_capacity must be greater than 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "unknown level '{}'",
                self.logging.level
            )));
        }
        if let Err(e) = self.logging.format.parse::<crate::logging::LogFormat>() {
            errors.push(ValidationError::Logging(e));
        }
        if let Err(e) = self.logging.output.parse::<crate::logging::LogOutput>() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validation_failed(errors: Vec<ValidationError>) -> ApiError {
    let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ApiError::ConfigError(format!(
        "Configuration validation failed:\n{}",
        msgs.join("\n")
    ))
}

/// Builds an [`AppConfig`] from every configured source.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the configuration for `root`.
    pub fn load(root: &Path) -> Result<AppConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::user_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, root)?;
        Self::finish(builder)
    }

    /// Load defaults plus one explicit file, then the environment.
    pub fn load_file(path: &Path) -> Result<AppConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path).required(true));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<AppConfig, ApiError> {
        let app: AppConfig = builder
            .add_source(merge::merge_policy::environment())
            .build()?
            .try_deserialize()?;
        app.validate().map_err(validation_failed)?;
        Ok(app)
    }
}

/// Configuration manager for runtime reloads
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Reload configuration from files. The current config is kept when
    /// the new one fails to load or validate.
    pub fn reload(&self, root: &Path) -> Result<(), ApiError> {
        let new_config = ConfigLoader::load(root)?;
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn get(&self) -> AppConfig {
        self.config.read().clone()
    }
}
