//! Edgesync CLI Binary
//!
//! Local maintenance commands for an edgesync node store.

use anyhow::Context;
use clap::Parser;
use edgesync::cli::{Cli, RunContext};
use edgesync::config::{AppConfig, ConfigLoader};
use edgesync::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(1);
        }
    };

    let logging_config = build_logging_config(&cli, &app_config);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Edgesync CLI starting");

    let store_path = cli.store.clone().unwrap_or(app_config.store.path.clone());
    let context = match RunContext::new(&store_path) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error opening store: {}", e);
            eprintln!("{}", edgesync::cli::map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            print!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", edgesync::cli::map_error(&e));
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ConfigLoader::load(&cli.root).context("failed to load configuration")?,
    };
    Ok(config)
}

/// Logging settings: config file, then CLI flags. Off unless --verbose.
fn build_logging_config(cli: &Cli, app: &AppConfig) -> LoggingConfig {
    let mut config = app.logging.clone();
    if !cli.verbose {
        config.level = "off".to_string();
        return config;
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }
    config
}
