//! Store mutation and hash maintenance across whole trees

use crate::integration::test_utils::at;
use edgesync::error::StoreError;
use edgesync::point::{point_type, Point};
use edgesync::store::{NodeFilter, SledStore};
use edgesync::types::{PARENT_NONE, SELECT_ALL};
use tempfile::TempDir;

fn child_of(parent: &str, secs: i64) -> Point {
    Point::text(point_type::ADD_PARENT, parent).at(at(secs))
}

fn up_hash(store: &SledStore, parent: &str, id: &str) -> [u8; 32] {
    store.get_node(parent, id).unwrap().unwrap().hash
}

/// r -> a -> b -> c
fn chain() -> SledStore {
    let store = SledStore::temporary().unwrap();
    store.node_points("r", vec![Point::new("value", 0.0).at(at(0))]).unwrap();
    store.node_points("a", vec![child_of("r", 1)]).unwrap();
    store.node_points("b", vec![child_of("a", 1)]).unwrap();
    store.node_points("c", vec![child_of("b", 1)]).unwrap();
    store
}

#[test]
fn test_leaf_change_reaches_every_ancestor() {
    let store = chain();
    let before = [
        up_hash(&store, "b", "c"),
        up_hash(&store, "a", "b"),
        up_hash(&store, "r", "a"),
        store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash,
    ];

    store
        .node_points("c", vec![Point::new("temp", 19.5).at(at(10))])
        .unwrap();
    let after = [
        up_hash(&store, "b", "c"),
        up_hash(&store, "a", "b"),
        up_hash(&store, "r", "a"),
        store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash,
    ];

    for (b, a) in before.iter().zip(after.iter()) {
        assert_ne!(b, a);
    }
    assert!(store.verify_hashes(false).unwrap().is_consistent());
}

#[test]
fn test_value_only_change_keeps_hashes() {
    let store = chain();
    store
        .node_points("c", vec![Point::new("temp", 19.5).at(at(10))])
        .unwrap();
    let before = store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash;

    // same series and time: not newer, so nothing is applied
    let outcome = store
        .node_points("c", vec![Point::new("temp", 40.0).at(at(10))])
        .unwrap();
    assert!(!outcome.changed);
    assert_eq!(store.node("c").unwrap().unwrap().points.value("temp", ""), Some(19.5));
    assert_eq!(store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash, before);
}

#[test]
fn test_new_child_changes_root_hash() {
    let store = SledStore::temporary().unwrap();
    store.node_points("r", vec![]).unwrap();
    let before = store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash;

    store
        .node_points("c", vec![Point::text(point_type::DESCRIPTION, "x")])
        .unwrap();
    let after = store.get_node(PARENT_NONE, "r").unwrap().unwrap().hash;
    assert_ne!(before, after);
}

#[test]
fn test_mirrored_node_updates_both_parents() {
    let store = SledStore::temporary().unwrap();
    store.node_points("r", vec![]).unwrap();
    store.node_points("a", vec![child_of("r", 1)]).unwrap();
    store.node_points("b", vec![child_of("r", 1)]).unwrap();
    store
        .node_points("m", vec![child_of("a", 2), child_of("b", 3)])
        .unwrap();

    let parents = store
        .get_nodes(SELECT_ALL, "m", &NodeFilter::default())
        .unwrap();
    assert_eq!(parents.len(), 2);

    let a_before = up_hash(&store, "r", "a");
    let b_before = up_hash(&store, "r", "b");
    store
        .node_points("m", vec![Point::new("level", 1.0).at(at(5))])
        .unwrap();
    assert_ne!(up_hash(&store, "r", "a"), a_before);
    assert_ne!(up_hash(&store, "r", "b"), b_before);
    assert!(store.verify_hashes(false).unwrap().is_consistent());
}

#[test]
fn test_repeated_tombstone_is_noop() {
    let store = chain();
    let tombstone = vec![Point::tombstone(true).at(at(20))];
    assert!(store.edge_points("c", "b", tombstone.clone()).unwrap().changed);
    let hash = up_hash(&store, "r", "a");

    let outcome = store.edge_points("c", "b", tombstone).unwrap();
    assert!(!outcome.changed);
    assert_eq!(up_hash(&store, "r", "a"), hash);
    assert!(store
        .get_nodes("b", SELECT_ALL, &NodeFilter::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_cycle_is_rejected_and_rolled_back() {
    let store = chain();
    let result = store.node_points("a", vec![child_of("c", 5)]);
    assert!(matches!(result, Err(StoreError::Cycle(_))));
    assert_eq!(store.up_edges("a").unwrap().len(), 1);
    assert!(store.verify_hashes(false).unwrap().is_consistent());
}

#[test]
fn test_reopened_store_keeps_tree_and_hashes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");
    let hash = {
        let store = SledStore::open(&path).unwrap();
        store.node_points("r", vec![Point::new("value", 1.0).at(at(0))]).unwrap();
        store.node_points("a", vec![child_of("r", 1)]).unwrap();
        store.flush().unwrap();
        up_hash(&store, "r", "a")
    };

    let store = SledStore::open(&path).unwrap();
    assert_eq!(store.root_id().unwrap().as_deref(), Some("r"));
    assert_eq!(up_hash(&store, "r", "a"), hash);
    assert!(store.verify_hashes(false).unwrap().is_consistent());
}

#[test]
fn test_same_batches_in_any_order_give_same_hash() {
    let batches = vec![
        ("a", vec![child_of("r", 1), Point::new("x", 1.0).at(at(2))]),
        ("b", vec![child_of("r", 1), Point::new("y", 2.0).at(at(3))]),
        ("a", vec![Point::new("x", 5.0).at(at(4))]),
        ("b", vec![Point::new("y", 1.0).at(at(1))]),
    ];

    let forward = SledStore::temporary().unwrap();
    let reverse = SledStore::temporary().unwrap();
    for store in [&forward, &reverse] {
        store.node_points("r", vec![Point::new("value", 0.0).at(at(0))]).unwrap();
    }
    // each node must exist before its later batches, so only swap the
    // creation order and the two updates
    let order_forward = [0usize, 1, 2, 3];
    let order_reverse = [1usize, 0, 3, 2];
    for i in order_forward {
        let (id, points) = &batches[i];
        forward.node_points(id, points.clone()).unwrap();
    }
    for i in order_reverse {
        let (id, points) = &batches[i];
        reverse.node_points(id, points.clone()).unwrap();
    }

    assert_eq!(
        forward.get_node(PARENT_NONE, "r").unwrap().unwrap().hash,
        reverse.get_node(PARENT_NONE, "r").unwrap().unwrap().hash
    );
    assert_eq!(
        forward.node("a").unwrap().unwrap().points,
        reverse.node("a").unwrap().unwrap().points
    );
}
