//! CLI route: single route table and run context.

use crate::cli::parse::{parse_point, Commands};
use crate::cli::presentation::{
    format_outcome, format_tree_json, format_tree_text, format_verify_report, TreeRow,
};
use crate::error::ApiError;
use crate::point::Point;
use crate::store::{NodeFilter, SledStore};
use crate::types::{MAX_TREE_DEPTH, ROOT_PARENT, SELECT_ALL};
use std::path::Path;
use tracing::info;

/// Runtime context for CLI execution: the opened store.
pub struct RunContext {
    store: SledStore,
}

impl RunContext {
    pub fn new(store_path: &Path) -> Result<Self, ApiError> {
        info!(store = %store_path.display(), "Opening store");
        Ok(Self {
            store: SledStore::open(store_path)?,
        })
    }

    pub fn from_store(store: SledStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SledStore {
        &self.store
    }

    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let output = match command {
            Commands::Points { id, points } => {
                let points = parse_points(points)?;
                let outcome = self.store.node_points(id, points)?;
                format_outcome(id, &outcome)
            }
            Commands::EdgePoints { id, parent, points } => {
                let points = parse_points(points)?;
                let outcome = self.store.edge_points(id, parent, points)?;
                format_outcome(id, &outcome)
            }
            Commands::Tree {
                from,
                deleted,
                format,
            } => {
                let rows = self.tree_rows(from.as_deref(), *deleted)?;
                match format.as_str() {
                    "json" => format_tree_json(&rows)
                        .map_err(|e| ApiError::InvalidArgument(e.to_string()))?,
                    "text" => format_tree_text(&rows),
                    other => {
                        return Err(ApiError::InvalidArgument(format!(
                            "unknown format {:?} (expected text or json)",
                            other
                        )))
                    }
                }
            }
            Commands::Verify { fix } => {
                let report = self.store.verify_hashes(*fix)?;
                format_verify_report(&report)
            }
        };
        self.store.flush()?;
        Ok(output)
    }

    /// Depth-first listing below `from` (the root by default).
    pub fn tree_rows(&self, from: Option<&str>, deleted: bool) -> Result<Vec<TreeRow>, ApiError> {
        let filter = NodeFilter {
            typ: None,
            include_deleted: deleted,
        };
        let start = match from {
            Some(id) => self.store.get_nodes(SELECT_ALL, id, &filter)?,
            None => self.store.get_nodes(ROOT_PARENT, SELECT_ALL, &filter)?,
        };

        let mut rows = Vec::new();
        let mut stack: Vec<_> = start.into_iter().take(1).map(|n| (n, 0usize)).collect();
        while let Some((node, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(ApiError::InvalidArgument(format!(
                    "tree below {} is deeper than {}",
                    node.id, MAX_TREE_DEPTH
                )));
            }
            let mut children = self.store.get_nodes(&node.id, SELECT_ALL, &filter)?;
            children.sort_by(|a, b| b.id.cmp(&a.id));
            rows.push(TreeRow {
                depth,
                description: node.points.desc().unwrap_or_default().to_string(),
                deleted: node.is_tombstone(),
                hash: hex::encode(node.hash),
                id: node.id,
                parent: node.parent,
                typ: node.typ,
            });
            stack.extend(children.into_iter().map(|c| (c, depth + 1)));
        }
        Ok(rows)
    }
}

fn parse_points(args: &[String]) -> Result<Vec<Point>, ApiError> {
    args.iter().map(|a| parse_point(a)).collect()
}
