//! Store-wide hash verification.

use crate::error::StoreError;
use crate::store::SledStore;
use crate::tree::hasher::compute_hash;
use crate::tree::propagate::propagate;
use crate::types::{short_hash, EdgeID, NodeID};
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub edge: EdgeID,
    pub up: NodeID,
    pub down: NodeID,
    pub stored: String,
    pub computed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub edges_checked: usize,
    pub mismatches: Vec<HashMismatch>,
    /// Edges rewritten when fixing was requested.
    pub fixed: usize,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl SledStore {
    /// Recompute every edge hash and compare with what is stored.
    ///
    /// With `fix`, every node below a mismatch is re-propagated in one
    /// transaction.
    pub fn verify_hashes(&self, fix: bool) -> Result<VerifyReport, StoreError> {
        let mut report = VerifyReport::default();
        {
            let _guard = self.lock.read();
            for edge in self.trees.all_edges()? {
                report.edges_checked += 1;
                let node_points = self
                    .trees
                    .node(&edge.down)?
                    .map(|n| n.points)
                    .unwrap_or_default();
                let down = self.trees.child_edges(&edge.down)?;
                let computed = compute_hash(Some(&edge.points), &node_points, &down);
                if computed != edge.hash {
                    warn!(
                        edge = %edge.id,
                        up = %edge.up,
                        down = %edge.down,
                        stored = %short_hash(&edge.hash),
                        computed = %short_hash(&computed),
                        "Hash mismatch"
                    );
                    report.mismatches.push(HashMismatch {
                        edge: edge.id.clone(),
                        up: edge.up.clone(),
                        down: edge.down.clone(),
                        stored: hex::encode(edge.hash),
                        computed: hex::encode(computed),
                    });
                }
            }
        }

        if fix && !report.mismatches.is_empty() {
            let start: Vec<NodeID> = report
                .mismatches
                .iter()
                .map(|m| m.down.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let mut uow = self.begin();
            report.fixed = propagate(&mut uow, &start)?;
            uow.commit()?;
            info!(fixed = report.fixed, "Repaired edge hashes");
        }

        Ok(report)
    }
}
