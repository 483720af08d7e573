//! Sync link supervision: connecting, retrying, config changes and cleanup

use crate::integration::test_utils::{at, eventually, Pair, Peer, REMOTE_URI};
use edgesync::bus::MemoryServer;
use edgesync::error::SyncError;
use edgesync::point::{node_type, point_type, Point};
use edgesync::sync::{LinkState, SyncLink, SyncLinkConfig, SyncManager};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

/// Create a `sync` node under the local root and return its config.
fn add_link(local: &Peer, id: &str, uri: &str, extra: Vec<Point>) -> SyncLinkConfig {
    let mut points = vec![
        Point::text(point_type::NODE_TYPE, node_type::SYNC).at(at(1)),
        Point::text(point_type::URI, uri).at(at(1)),
    ];
    points.extend(extra);
    local.add_child("edge", id, points);
    SyncLinkConfig::from_node(&local.node("edge", id).unwrap())
}

fn slow_period() -> Point {
    Point::new(point_type::PERIOD, 3600.0).at(at(1))
}

async fn connected_link(pair: &Pair) -> SyncLink {
    let config = add_link(&pair.local, "uplink", REMOTE_URI, vec![slow_period()]);
    let link = SyncLink::start(config, pair.context()).await.unwrap();
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);
    link.sync_now().await.unwrap();
    link
}

#[tokio::test]
async fn test_link_connects_and_copies_tree() {
    let pair = Pair::start().await;
    pair.local
        .add_child("edge", "pump", vec![Point::new("flow", 1.0).at(at(2))]);
    let link = connected_link(&pair).await;

    assert_eq!(link.id(), "uplink");
    assert!(pair.remote.node("cloud", "edge").is_some());
    assert!(pair.remote.node("edge", "pump").is_some());
    assert_eq!(pair.remote.node("edge", "uplink").unwrap().typ, node_type::SYNC);
    assert_eq!(
        pair.local.detached_hash("edge"),
        pair.remote.detached_hash("edge")
    );

    link.stop().await;
}

#[tokio::test]
async fn test_sync_count_bumps_and_resets() {
    let pair = Pair::start().await;
    pair.local
        .add_child("edge", "pump", vec![Point::new("flow", 1.0).at(at(2))]);
    let link = connected_link(&pair).await;

    // written straight to the store, so only a pass can carry it over
    pair.local
        .store
        .node_points("pump", vec![Point::new("rpm", 900.0).at(at(9))])
        .unwrap();
    let stats = link.sync_now().await.unwrap();
    assert!(stats.root_differed);
    assert_eq!(pair.remote.value("pump", "rpm"), Some(900.0));
    assert!(pair.local.value("uplink", point_type::SYNC_COUNT).unwrap() >= 1.0);

    pair.local
        .client
        .send_node_points("uplink", &[Point::new(point_type::SYNC_COUNT_RESET, 1.0)], true)
        .await
        .unwrap();
    let local = &pair.local;
    assert!(
        eventually(WAIT, || {
            local.value("uplink", point_type::SYNC_COUNT_RESET) == Some(0.0)
                && local.value("uplink", point_type::SYNC_COUNT) == Some(0.0)
        })
        .await
    );

    link.stop().await;
}

#[tokio::test]
async fn test_live_changes_flow_both_ways() {
    let pair = Pair::start().await;
    pair.local
        .add_child("edge", "pump", vec![Point::new("flow", 1.0).at(at(2))]);
    let link = connected_link(&pair).await;
    let (local, remote) = (&pair.local, &pair.remote);

    local
        .client
        .send_node_points("pump", &[Point::new("flow", 7.0).at(at(20))], true)
        .await
        .unwrap();
    assert!(eventually(WAIT, || remote.value("pump", "flow") == Some(7.0)).await);

    remote
        .client
        .send_node_points("pump", &[Point::new("flow", 8.0).at(at(21))], true)
        .await
        .unwrap();
    assert!(eventually(WAIT, || local.value("pump", "flow") == Some(8.0)).await);

    local
        .client
        .send_node_points(
            "valve",
            &[
                Point::text(point_type::DESCRIPTION, "inlet").at(at(22)),
                Point::text(point_type::ADD_PARENT, "pump").at(at(22)),
            ],
            true,
        )
        .await
        .unwrap();
    assert!(eventually(WAIT, || remote.node("pump", "valve").is_some()).await);

    remote
        .client
        .send_node_points(
            "meter",
            &[
                Point::new("kwh", 12.0).at(at(23)),
                Point::text(point_type::ADD_PARENT, "edge").at(at(23)),
            ],
            true,
        )
        .await
        .unwrap();
    assert!(eventually(WAIT, || local.value("meter", "kwh") == Some(12.0)).await);
    assert!(local.node("edge", "meter").is_some());

    link.stop().await;
}

#[tokio::test]
async fn test_missing_period_is_replaced_with_default() {
    let pair = Pair::start().await;
    let config = add_link(&pair.local, "uplink", REMOTE_URI, vec![]);
    assert_eq!(config.period, 0);

    let link = SyncLink::start(config, pair.context()).await.unwrap();
    let local = &pair.local;
    assert!(eventually(WAIT, || local.value("uplink", point_type::PERIOD) == Some(20.0)).await);

    link.stop().await;
}

#[tokio::test]
async fn test_disabled_link_stays_offline_until_enabled() {
    let pair = Pair::start().await;
    let config = add_link(
        &pair.local,
        "uplink",
        REMOTE_URI,
        vec![slow_period(), Point::new(point_type::DISABLE, 1.0).at(at(1))],
    );
    let link = SyncLink::start(config, pair.context()).await.unwrap();

    assert!(link.wait_for_state(LinkState::Disabled, WAIT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(link.state(), LinkState::Disabled);
    assert_eq!(pair.remote.server.subscription_count(), 3);
    assert!(matches!(link.sync_now().await, Err(SyncError::NotConnected)));

    pair.local
        .client
        .send_node_points("uplink", &[Point::new(point_type::DISABLE, 0.0)], true)
        .await
        .unwrap();
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);

    link.stop().await;
}

#[tokio::test]
async fn test_link_retries_until_remote_is_reachable() {
    let pair = Pair::start().await;
    pair.network.set_reachable(REMOTE_URI, false);
    let config = add_link(&pair.local, "uplink", REMOTE_URI, vec![slow_period()]);
    let link = SyncLink::start(config, pair.context()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_ne!(link.state(), LinkState::Connected);

    pair.network.set_reachable(REMOTE_URI, true);
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);
    link.sync_now().await.unwrap();
    assert!(pair.remote.node("cloud", "edge").is_some());

    link.stop().await;
}

#[tokio::test]
async fn test_lost_connection_is_reestablished() {
    let pair = Pair::start().await;
    let link = connected_link(&pair).await;

    pair.network.set_reachable(REMOTE_URI, false);
    assert!(link.wait_for_state(LinkState::Disconnected, WAIT).await);

    pair.network.set_reachable(REMOTE_URI, true);
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);
    link.sync_now().await.unwrap();

    link.stop().await;
}

#[tokio::test]
async fn test_auth_token_change_reconnects() {
    let pair = Pair::start().await;
    let secure = Peer::start_on(MemoryServer::with_auth_token("s3cret"), "vault").await;
    pair.network.add_server("mem://secure", secure.server.clone());

    let config = add_link(
        &pair.local,
        "uplink",
        "mem://secure",
        vec![slow_period(), Point::text(point_type::AUTH_TOKEN, "wrong").at(at(1))],
    );
    let link = SyncLink::start(config, pair.context()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_ne!(link.state(), LinkState::Connected);

    pair.local
        .client
        .send_node_points("uplink", &[Point::text(point_type::AUTH_TOKEN, "s3cret")], true)
        .await
        .unwrap();
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);
    link.sync_now().await.unwrap();
    assert!(secure.node("vault", "edge").is_some());

    link.stop().await;
}

#[tokio::test]
async fn test_stop_releases_every_subscription() {
    let pair = Pair::start().await;
    pair.local
        .add_child("edge", "pump", vec![Point::new("flow", 1.0).at(at(2))]);
    let link = connected_link(&pair).await;
    assert!(pair.remote.server.subscription_count() > 3);
    assert!(pair.local.server.subscription_count() > 3);

    link.stop().await;
    assert_eq!(pair.remote.server.subscription_count(), 3);
    assert_eq!(pair.local.server.subscription_count(), 3);
}

#[tokio::test]
async fn test_manager_follows_sync_nodes() {
    let pair = Pair::start().await;
    add_link(&pair.local, "uplink", REMOTE_URI, vec![slow_period()]);
    let mut manager = SyncManager::new(pair.context());

    assert_eq!(manager.refresh().await.unwrap(), 1);
    assert_eq!(manager.link_ids(), vec!["uplink".to_string()]);
    let link = manager.link("uplink").unwrap();
    assert!(link.wait_for_state(LinkState::Connected, WAIT).await);

    // unchanged nodes keep their running link
    assert_eq!(manager.refresh().await.unwrap(), 1);

    pair.local
        .store
        .edge_points("uplink", "edge", vec![Point::tombstone(true).at(at(50))])
        .unwrap();
    assert_eq!(manager.refresh().await.unwrap(), 0);
    assert!(manager.link("uplink").is_none());

    manager.stop_all().await;
    assert_eq!(pair.local.server.subscription_count(), 3);
}
