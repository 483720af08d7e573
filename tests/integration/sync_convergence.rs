//! Tree sync between two stores through a bare SyncEngine

use crate::integration::test_utils::{at, engine_between, eventually, Peer};
use edgesync::error::SyncError;
use edgesync::node::{Edge, Node};
use edgesync::point::Point;
use edgesync::store::NodeFilter;
use edgesync::types::{MAX_TREE_DEPTH, SELECT_ALL};
use std::time::Duration;

/// Local root `edge` with `pump` below it and `sensor` below `pump`; the
/// remote starts with only its own root `cloud`.
async fn seeded() -> (Peer, Peer) {
    let local = Peer::start("edge").await;
    let remote = Peer::start("cloud").await;
    local.add_child("edge", "pump", vec![Point::new("flow", 1.0).at(at(2))]);
    local.add_child("pump", "sensor", vec![Point::new("temp", 20.0).at(at(2))]);
    (local, remote)
}

#[tokio::test]
async fn test_first_pass_copies_local_tree_under_remote_root() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;

    let stats = engine.sync_root().await.unwrap();
    assert_eq!(stats.nodes_pushed, 3);
    assert_eq!(stats.failures, 0);

    assert!(remote.node("cloud", "edge").is_some());
    assert!(remote.node("edge", "pump").is_some());
    assert!(remote.node("pump", "sensor").is_some());
    assert_eq!(remote.value("sensor", "temp"), Some(20.0));
    assert_eq!(remote.text("edge", "description").as_deref(), Some("edge"));
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));
    assert_eq!(engine.root_remote().map(|r| r.id.as_str()), Some("cloud"));
}

#[tokio::test]
async fn test_second_pass_on_converged_pair_is_noop() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    let stats = engine.sync_root().await.unwrap();
    assert!(!stats.changed());
    assert!(!stats.root_differed);
    assert_eq!(stats.visited, 1, "equal root hashes stop the walk");
}

#[tokio::test]
async fn test_disjoint_points_converge() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    local
        .store
        .node_points("pump", vec![Point::new("rpm", 1450.0).at(at(5))])
        .unwrap();
    remote
        .store
        .node_points("pump", vec![Point::new("pressure", 2.5).at(at(6))])
        .unwrap();

    let stats = engine.sync_root().await.unwrap();
    assert!(stats.root_differed);
    assert_eq!(stats.points_pushed, 1);
    assert_eq!(stats.points_pulled, 1);

    assert_eq!(local.value("pump", "pressure"), Some(2.5));
    assert_eq!(remote.value("pump", "rpm"), Some(1450.0));
    assert_eq!(
        local.node("edge", "pump").unwrap().hash,
        remote.node("edge", "pump").unwrap().hash
    );
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));
}

#[tokio::test]
async fn test_newer_point_wins_in_both_directions() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    local
        .store
        .node_points("pump", vec![Point::new("flow", 5.0).at(at(10))])
        .unwrap();
    remote
        .store
        .node_points("pump", vec![Point::new("flow", 9.0).at(at(11))])
        .unwrap();
    local
        .store
        .node_points("sensor", vec![Point::new("temp", 25.0).at(at(12))])
        .unwrap();
    remote
        .store
        .node_points("sensor", vec![Point::new("temp", 21.0).at(at(11))])
        .unwrap();

    engine.sync_root().await.unwrap();

    assert_eq!(local.value("pump", "flow"), Some(9.0));
    assert_eq!(remote.value("pump", "flow"), Some(9.0));
    assert_eq!(local.value("sensor", "temp"), Some(25.0));
    assert_eq!(remote.value("sensor", "temp"), Some(25.0));
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));
}

#[tokio::test]
async fn test_remote_only_subtree_is_pulled() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    remote.add_child("edge", "valve", vec![Point::text("description", "inlet").at(at(3))]);
    remote.add_child("valve", "seat", vec![Point::new("wear", 0.1).at(at(3))]);

    let stats = engine.sync_root().await.unwrap();
    assert_eq!(stats.nodes_pulled, 2);
    assert_eq!(stats.nodes_pushed, 0);

    assert_eq!(local.text("valve", "description").as_deref(), Some("inlet"));
    assert!(local.node("valve", "seat").is_some());
    assert!(engine.is_registered("seat"));
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));
}

#[tokio::test]
async fn test_newer_tombstone_deletes_remote_edge() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    local
        .store
        .edge_points("pump", "edge", vec![Point::tombstone(true).at(at(40))])
        .unwrap();
    engine.sync_root().await.unwrap();

    assert!(remote.node("edge", "pump").unwrap().is_tombstone());
    let live = remote
        .store
        .get_nodes("edge", SELECT_ALL, &NodeFilter::default())
        .unwrap();
    assert!(live.is_empty());
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));

    // an older remote undelete loses
    remote
        .store
        .edge_points("pump", "edge", vec![Point::tombstone(false).at(at(39))])
        .unwrap();
    assert!(remote.node("edge", "pump").unwrap().is_tombstone());
}

#[tokio::test]
async fn test_tombstoned_root_placement_is_restored_on_remote() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    remote
        .store
        .edge_points("edge", "cloud", vec![Point::tombstone(true).at(at(50))])
        .unwrap();
    assert!(remote.node("cloud", "edge").unwrap().is_tombstone());

    local
        .store
        .node_points("pump", vec![Point::new("flow", 2.0).at(at(60))])
        .unwrap();
    engine.sync_root().await.unwrap();

    assert!(!remote.node("cloud", "edge").unwrap().is_tombstone());
    assert_eq!(remote.value("pump", "flow"), Some(2.0));
    assert!(!engine.sync_root().await.unwrap().changed());
}

#[tokio::test]
async fn test_deleted_child_is_pushed_deleted() {
    let (local, remote) = seeded().await;
    local.add_child("edge", "spare", vec![Point::new("value", 1.0).at(at(2))]);
    local
        .store
        .edge_points("spare", "edge", vec![Point::tombstone(true).at(at(4))])
        .unwrap();

    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    let spare = remote.node("edge", "spare").unwrap();
    assert!(spare.is_tombstone());
    assert_eq!(local.detached_hash("edge"), remote.detached_hash("edge"));
    assert!(!engine.sync_root().await.unwrap().changed());
}

#[tokio::test]
async fn test_multi_parent_node_syncs_under_every_parent() {
    let (local, remote) = seeded().await;
    local.add_child("edge", "area", vec![]);
    local.add_child("edge", "shared", vec![Point::new("level", 3.0).at(at(2))]);
    local
        .store
        .node_points("shared", vec![Point::text("addParent", "area").at(at(3))])
        .unwrap();

    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    let parents = remote
        .store
        .get_nodes(SELECT_ALL, "shared", &NodeFilter::default())
        .unwrap();
    let mut parent_ids: Vec<&str> = parents.iter().map(|n| n.parent.as_str()).collect();
    parent_ids.sort();
    assert_eq!(parent_ids, vec!["area", "edge"]);

    remote
        .store
        .node_points("shared", vec![Point::new("level", 4.0).at(at(30))])
        .unwrap();
    engine.sync_root().await.unwrap();

    assert_eq!(local.value("shared", "level"), Some(4.0));
    for parent in ["area", "edge"] {
        assert_eq!(
            local.node(parent, "shared").unwrap().hash,
            remote.node(parent, "shared").unwrap().hash
        );
    }
    assert!(!engine.sync_root().await.unwrap().changed());
}

#[tokio::test]
async fn test_pull_past_depth_bound_fails() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    // committed without hash propagation, which refuses a chain this deep
    let mut uow = remote.store.begin();
    let mut parent = "edge".to_string();
    for k in 0..=MAX_TREE_DEPTH {
        let id = format!("deep{}", k);
        uow.put_node(Node::new(id.as_str()));
        let mut edge = Edge::new(parent.as_str(), id.as_str());
        edge.points.merge(Point::tombstone(false).at(at(1)));
        uow.insert_edge(edge).unwrap();
        parent = id;
    }
    uow.commit().unwrap();

    let result = engine.sync_root().await;
    assert!(matches!(
        result,
        Err(SyncError::DepthExceeded { limit: MAX_TREE_DEPTH, .. })
    ));
    let last_pulled = format!("deep{}", MAX_TREE_DEPTH - 1);
    assert!(local.store.node(&last_pulled).unwrap().is_some());
    let too_deep = format!("deep{}", MAX_TREE_DEPTH);
    assert!(local.store.node(&too_deep).unwrap().is_none());
}

#[tokio::test]
async fn test_new_edges_at_the_link_boundary_are_ignored() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;

    let stats = engine.handle_new_edge("cloud", "edge").await.unwrap();
    assert_eq!(stats.visited, 0);
    let stats = engine.handle_new_edge("cloud", "other").await.unwrap();
    assert_eq!(stats.visited, 0);
    assert!(remote.node("cloud", "edge").is_none());
}

#[tokio::test]
async fn test_new_edge_syncs_only_that_node() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    local.add_child("pump", "gauge", vec![Point::new("psi", 40.0).at(at(7))]);
    let stats = engine.handle_new_edge("pump", "gauge").await.unwrap();
    assert_eq!(stats.nodes_pushed, 1);
    assert_eq!(remote.value("gauge", "psi"), Some(40.0));
    assert!(engine.is_registered("gauge"));
}

#[tokio::test]
async fn test_registered_nodes_forward_remote_changes() {
    let (local, remote) = seeded().await;
    let mut engine = engine_between(&local, &remote).await;
    engine.sync_root().await.unwrap();

    let patterns = remote.server.subscription_patterns();
    assert!(patterns.contains(&"p.sensor".to_string()));
    assert!(patterns.contains(&"p.sensor.pump".to_string()));
    assert!(patterns.contains(&"p.edge".to_string()));
    assert!(!patterns.iter().any(|p| p.starts_with("p.edge.")));

    remote
        .client
        .send_node_points("sensor", &[Point::new("temp", 30.0).at(at(20))], true)
        .await
        .unwrap();
    assert!(
        eventually(Duration::from_secs(2), || local.value("sensor", "temp") == Some(30.0)).await
    );

    engine.shutdown().await;
    assert_eq!(remote.server.subscription_count(), 3);
}
