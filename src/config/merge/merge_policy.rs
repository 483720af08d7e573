//! Merge rules: defaults first, environment last.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

/// Create a Config builder with the store defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default(
            "store.path",
            crate::config::default_store_path().to_string_lossy().to_string(),
        )?
        .set_default("store.bus_uri", "mem://local")
}

/// `EDGESYNC__SECTION__KEY` overrides, e.g. `EDGESYNC__SYNC__PERIOD_SECS=5`.
pub fn environment() -> Environment {
    Environment::with_prefix("EDGESYNC")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
