//! Shared test utilities for integration tests
//!
//! A [`Peer`] is one running store: a temporary sled store served on its own
//! memory server. Sync tests pair two peers, either through a bare
//! [`SyncEngine`] or through a [`MemoryNetwork`] for full links.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use edgesync::bus::{ConnectOptions, MemoryNetwork, MemoryServer};
use edgesync::client::NodeClient;
use edgesync::node::NodeEdge;
use edgesync::point::{point_type, Point};
use edgesync::service::{ServiceHandle, StoreService};
use edgesync::store::SledStore;
use edgesync::sync::{LinkContext, SyncDefaults, SyncEngine};
use edgesync::types::PARENT_NONE;
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_URI: &str = "mem://local";
pub const REMOTE_URI: &str = "mem://remote";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A store plus the service answering for it.
pub struct Peer {
    pub server: MemoryServer,
    pub store: Arc<SledStore>,
    /// Echo-enabled client, standing in for any other local process.
    pub client: NodeClient,
    _service: ServiceHandle,
}

impl Peer {
    /// Start a peer whose root node is `root`.
    pub async fn start(root: &str) -> Self {
        Self::start_on(MemoryServer::new(), root).await
    }

    pub async fn start_on(server: MemoryServer, root: &str) -> Self {
        let store = Arc::new(SledStore::temporary().unwrap());
        let service = StoreService::new(store.clone(), server.connect());
        let handle = service.start().await.unwrap();
        let client = NodeClient::new(server.connect()).with_timeout(Duration::from_secs(2));
        client
            .send_node_points(root, &[Point::text(point_type::DESCRIPTION, root).at(at(0))], true)
            .await
            .unwrap();
        Self {
            server,
            store,
            client,
            _service: handle,
        }
    }

    /// Client on a connection that does not see its own publications.
    pub fn quiet_client(&self, name: &str) -> NodeClient {
        let conn = self
            .server
            .connect_with(&ConnectOptions::new("mem").no_echo().name(name))
            .unwrap();
        NodeClient::new(conn).with_timeout(Duration::from_secs(2))
    }

    /// Create `id` under `parent` straight in the store.
    pub fn add_child(&self, parent: &str, id: &str, points: Vec<Point>) {
        let mut batch = points;
        batch.push(Point::text(point_type::ADD_PARENT, parent).at(at(1)));
        self.store.node_points(id, batch).unwrap();
    }

    pub fn node(&self, parent: &str, id: &str) -> Option<NodeEdge> {
        self.store.get_node(parent, id).unwrap()
    }

    pub fn value(&self, id: &str, typ: &str) -> Option<f64> {
        self.store
            .node(id)
            .unwrap()
            .and_then(|n| n.points.value(typ, ""))
    }

    pub fn text(&self, id: &str, typ: &str) -> Option<String> {
        self.store
            .node(id)
            .unwrap()
            .and_then(|n| n.points.text(typ, "").map(str::to_string))
    }

    /// Hash of `id` ignoring its up-edges.
    pub fn detached_hash(&self, id: &str) -> [u8; 32] {
        self.node(PARENT_NONE, id).unwrap().hash
    }
}

/// Engine syncing `local`'s tree into `remote`, on no-echo connections as a
/// link would use.
pub async fn engine_between(local: &Peer, remote: &Peer) -> SyncEngine {
    let local_client = local.quiet_client("engine-local");
    let remote_client = remote.quiet_client("engine-remote");
    let root = local_client.get_root().await.unwrap();
    SyncEngine::new(local_client, remote_client, root, "sync-test")
}

/// Two peers reachable by URI.
pub struct Pair {
    pub network: MemoryNetwork,
    pub local: Peer,
    pub remote: Peer,
}

impl Pair {
    pub async fn start() -> Self {
        let local = Peer::start("edge").await;
        let remote = Peer::start("cloud").await;
        let network = MemoryNetwork::new();
        network.add_server(LOCAL_URI, local.server.clone());
        network.add_server(REMOTE_URI, remote.server.clone());
        Self {
            network,
            local,
            remote,
        }
    }

    pub fn context(&self) -> LinkContext {
        LinkContext {
            local: Arc::new(self.network.clone()),
            local_uri: LOCAL_URI.to_string(),
            remote: Arc::new(self.network.clone()),
            defaults: fast_defaults(),
        }
    }
}

pub fn fast_defaults() -> SyncDefaults {
    SyncDefaults {
        connect_retry_ms: 50,
        initial_connect_delay_ms: 5,
        request_timeout_ms: 2000,
        ..SyncDefaults::default()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
