//! CLI parse: clap types for edgesync, plus point argument parsing.

use crate::error::ApiError;
use crate::point::Point;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Edgesync CLI - local node store maintenance
#[derive(Parser)]
#[command(name = "edgesync")]
#[command(about = "Inspect and edit a local edgesync node store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Root directory for config/edgesync.toml
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides store.path from config)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply points to a node (creates the node if needed)
    Points {
        /// Node ID
        id: String,
        /// Points as type[:key]=value; non-numeric values are stored as text
        #[arg(required = true)]
        points: Vec<String>,
    },
    /// Apply points to the edge between a node and its parent
    EdgePoints {
        /// Node ID
        id: String,
        /// Parent node ID ("none" for the root's own edge)
        parent: String,
        /// Points as type[:key]=value
        #[arg(required = true)]
        points: Vec<String>,
    },
    /// Print the node tree with hashes
    Tree {
        /// Start node (default: root)
        #[arg(long)]
        from: Option<String>,
        /// Include deleted edges
        #[arg(long)]
        deleted: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Recompute every edge hash and report mismatches
    Verify {
        /// Rewrite mismatched hashes
        #[arg(long)]
        fix: bool,
    },
}

/// Parse `type[:key]=value`. Numeric values set `value`, anything else sets
/// `text`.
pub fn parse_point(arg: &str) -> Result<Point, ApiError> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| ApiError::InvalidArgument(format!("expected type=value, got {:?}", arg)))?;
    let (typ, key) = match name.split_once(':') {
        Some((typ, key)) => (typ, key),
        None => (name, ""),
    };
    if typ.is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "missing point type in {:?}",
            arg
        )));
    }
    let point = match raw.parse::<f64>() {
        Ok(value) => Point::new(typ, value),
        Err(_) => Point::text(typ, raw),
    };
    Ok(point.with_key(key))
}
