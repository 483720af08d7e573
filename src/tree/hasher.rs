//! Hash computation for NodeEdges using BLAKE3
//!
//! Hash = BLAKE3(up-edge point times || node point times || down-edge hashes)
//!
//! Point times are fed as little-endian i64 nanoseconds, each point bag ordered
//! by `(typ, key)`. Down-edge hashes are ordered by edge ID. Point values and
//! texts never participate, so the hash only answers "has anything under here
//! been touched".

use crate::node::Edge;
use crate::point::{Point, Points};
use crate::types::Hash;
use blake3::Hasher;

/// Compute the hash of a node viewed through one up-edge.
///
/// Pass `None` for `up_edge_points` to get the detached view (no edge
/// contribution).
pub fn compute_hash<'a, I>(up_edge_points: Option<&Points>, node_points: &Points, down_edges: I) -> Hash
where
    I: IntoIterator<Item = &'a Edge>,
{
    let mut hasher = Hasher::new();

    if let Some(points) = up_edge_points {
        update_point_times(&mut hasher, points);
    }

    update_point_times(&mut hasher, node_points);

    let mut down: Vec<&Edge> = down_edges.into_iter().collect();
    down.sort_by(|a, b| a.id.cmp(&b.id));
    for edge in down {
        hasher.update(&edge.hash);
    }

    *hasher.finalize().as_bytes()
}

fn update_point_times(hasher: &mut Hasher, points: &Points) {
    let mut ordered: Vec<&Point> = points.iter().collect();
    ordered.sort_by(|a, b| (a.typ.as_str(), a.key.as_str()).cmp(&(b.typ.as_str(), b.key.as_str())));
    for point in ordered {
        hasher.update(&point.time_nanos().to_le_bytes());
    }
}
