//! CLI domain: parse, route, output and presentation only.
//! Store maintenance commands; no sync orchestration.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{parse_point, Cli, Commands};
pub use presentation::{format_outcome, format_tree_json, format_tree_text, format_verify_report, TreeRow};
pub use route::RunContext;
