//! User config file source: `<config dir>/edgesync/config.toml`

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::PathBuf;
use tracing::debug;

/// Path to the user config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "edgesync").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the user config file to the builder if it exists.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match user_config_path() {
        Some(path) if path.exists() => {
            builder = builder.add_source(File::from(path).required(false));
        }
        Some(path) => {
            debug!(config_path = %path.display(), "No user configuration file");
        }
        None => {}
    }
    Ok(builder)
}
