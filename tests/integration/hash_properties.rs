//! Property-based tests for hash and merge guarantees

use crate::integration::test_utils::at;
use edgesync::point::{point_type, Point, Points};
use edgesync::store::SledStore;
use edgesync::sync::diff_points;
use edgesync::tree::hasher::compute_hash;
use edgesync::types::PARENT_NONE;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};

const NODES: [&str; 3] = ["a", "b", "c"];

/// `(node index, series, value, seconds)`
fn writes() -> impl Strategy<Value = Vec<(usize, u8, f64, i64)>> {
    prop::collection::vec((0..NODES.len(), 0u8..3, -100.0f64..100.0, 0i64..50), 0..24)
}

/// Root `r` with `a` and `b` under it and `c` under `a`, all stamped with
/// fixed times.
fn seeded_store() -> SledStore {
    let store = SledStore::temporary().unwrap();
    store.node_points("r", vec![Point::new("value", 0.0).at(at(0))]).unwrap();
    for (id, parent) in [("a", "r"), ("b", "r"), ("c", "a")] {
        store
            .node_points(id, vec![Point::text(point_type::ADD_PARENT, parent).at(at(0))])
            .unwrap();
    }
    store
}

fn apply(store: &SledStore, writes: &[(usize, u8, f64, i64)]) {
    for (node, series, value, secs) in writes {
        let point = Point::new(format!("s{}", series), *value).at(at(*secs));
        store.node_points(NODES[*node], vec![point]).unwrap();
    }
}

fn root_hash(store: &SledStore) -> [u8; 32] {
    store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash
}

fn runner() -> TestRunner {
    TestRunner::new(Config {
        cases: 32,
        ..Config::default()
    })
}

/// Applying the same writes in reverse order yields the same root hash
#[test]
fn test_write_order_does_not_change_hash_property() {
    runner()
        .run(&writes(), |writes| {
            let forward = seeded_store();
            let reverse = seeded_store();
            apply(&forward, &writes);
            let reversed: Vec<_> = writes.iter().rev().cloned().collect();
            apply(&reverse, &reversed);

            prop_assert_eq!(root_hash(&forward), root_hash(&reverse));
            Ok(())
        })
        .unwrap();
}

/// Replaying every write a second time changes nothing
#[test]
fn test_replay_is_idempotent_property() {
    runner()
        .run(&writes(), |writes| {
            let store = seeded_store();
            apply(&store, &writes);
            let hash = root_hash(&store);

            for (node, series, value, secs) in &writes {
                let point = Point::new(format!("s{}", series), *value).at(at(*secs));
                let outcome = store.node_points(NODES[*node], vec![point]).unwrap();
                prop_assert!(!outcome.changed);
            }
            prop_assert_eq!(root_hash(&store), hash);
            prop_assert!(store.verify_hashes(false).unwrap().is_consistent());
            Ok(())
        })
        .unwrap();
}

/// Hashes follow point times and ignore values
#[test]
fn test_hash_tracks_time_not_value_property() {
    let mut runner = TestRunner::default();
    runner
        .run(
            &(any::<f64>(), any::<f64>(), 0i64..1000, 0i64..1000),
            |(v1, v2, t1, t2)| {
                let a: Points = vec![Point::new("value", v1).at(at(t1))].into();
                let b: Points = vec![Point::new("value", v2).at(at(t2))].into();
                let ha = compute_hash(None, &a, std::iter::empty());
                let hb = compute_hash(None, &b, std::iter::empty());
                if t1 == t2 {
                    prop_assert_eq!(ha, hb);
                } else {
                    prop_assert_ne!(ha, hb);
                }
                Ok(())
            },
        )
        .unwrap();
}

/// Merging each side's diff into the other leaves both bags equal
#[test]
fn test_diff_exchange_converges_property() {
    let bag = || prop::collection::vec((0u8..4, 0i64..20, -10.0f64..10.0), 0..8);
    let mut runner = TestRunner::default();
    runner
        .run(&(bag(), bag()), |(left, right)| {
            let build = |raw: &[(u8, i64, f64)]| {
                let mut points = Points::new();
                for (series, secs, value) in raw {
                    points.merge(Point::new(format!("s{}", series), *value).at(at(*secs)));
                }
                points
            };
            let mut local = build(&left);
            let mut remote = build(&right);

            let (push, pull) = diff_points(&local, &remote);
            remote.merge_all(push);
            local.merge_all(pull);

            for p in local.iter() {
                let r = remote.find(&p.typ, &p.key);
                prop_assert!(r.is_some());
                prop_assert_eq!(r.map(|r| r.time), Some(p.time));
            }
            prop_assert_eq!(local.len(), remote.len());
            Ok(())
        })
        .unwrap();
}
