//! CLI presentation: tables and JSON for command results.

use crate::store::{ApplyOutcome, VerifyReport};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

/// One line of `edgesync tree`.
#[derive(Debug, Clone, Serialize)]
pub struct TreeRow {
    pub depth: usize,
    pub id: String,
    pub parent: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub description: String,
    pub hash: String,
    pub deleted: bool,
}

pub fn format_tree_text(rows: &[TreeRow]) -> String {
    if rows.is_empty() {
        return "Store is empty.\n".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Node", "Type", "Description", "Hash", "Deleted"]);
    for row in rows {
        table.add_row(vec![
            format!("{}{}", "  ".repeat(row.depth), row.id),
            row.typ.clone(),
            row.description.clone(),
            row.hash[..row.hash.len().min(12)].to_string(),
            if row.deleted { "yes" } else { "" }.to_string(),
        ]);
    }
    format!("{}\n", table)
}

pub fn format_tree_json(rows: &[TreeRow]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rows)
}

pub fn format_verify_report(report: &VerifyReport) -> String {
    let mut out = format!("Edges checked: {}\n", report.edges_checked);
    if report.mismatches.is_empty() {
        out.push_str("All hashes consistent.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Edge", "Parent", "Node", "Stored", "Computed"]);
    for m in &report.mismatches {
        table.add_row(vec![
            m.edge.clone(),
            m.up.clone(),
            m.down.clone(),
            m.stored[..m.stored.len().min(12)].to_string(),
            m.computed[..m.computed.len().min(12)].to_string(),
        ]);
    }
    out.push_str(&format!("{}\n", table));
    if report.fixed > 0 {
        out.push_str(&format!("Rewrote {} edge hashes.\n", report.fixed));
    }
    out
}

pub fn format_outcome(id: &str, outcome: &ApplyOutcome) -> String {
    let mut out = if outcome.created {
        format!("Created node {}\n", id)
    } else if outcome.changed {
        format!("Updated node {}\n", id)
    } else {
        format!("No change to node {}\n", id)
    };
    for edge in &outcome.edges {
        out.push_str(&format!("  edge {} -> {}\n", edge.parent, edge.id));
    }
    out
}
