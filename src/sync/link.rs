//! Connection supervisor for one sync link.
//!
//! Each link runs a single control loop on its own task. Bus subscriptions
//! feed a bounded mailbox; the loop owns the remote connection, the
//! [`SyncEngine`] and the link's config, so none of them need locking.
//!
//! Two local connections are used. `control` has echo enabled and carries the
//! link's own config traffic, so counters the link publishes are seen by its
//! local wildcard subscriptions and forwarded like any other change. `local`
//! has echo disabled; it runs the wildcard subscriptions and every write made
//! on behalf of the remote, which keeps forwarded points from bouncing back.

use crate::bus::{Bus, ConnectOptions, Connector, Message, Subscription};
use crate::client::NodeClient;
use crate::codec;
use crate::error::SyncError;
use crate::node::NodeEdge;
use crate::point::{point_type, Point};
use crate::subject::{self, Subject};
use crate::sync::config::{SyncDefaults, SyncLinkConfig};
use crate::sync::engine::{SyncEngine, SyncStats};
use crate::types::{NodeID, ROOT_PARENT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disabled => "disabled",
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// How a link reaches both buses.
#[derive(Clone)]
pub struct LinkContext {
    pub local: Arc<dyn Connector>,
    pub local_uri: String,
    pub remote: Arc<dyn Connector>,
    pub defaults: SyncDefaults,
}

pub(crate) enum LinkEvent {
    LocalNodePoints {
        id: NodeID,
        payload: Vec<u8>,
    },
    LocalEdgePoints {
        id: NodeID,
        parent: NodeID,
        payload: Vec<u8>,
        new_edge: bool,
    },
    RemoteNewEdge {
        id: NodeID,
        parent: NodeID,
    },
    ConfigPoints(Vec<Point>),
    SyncNow(oneshot::Sender<Result<SyncStats, SyncError>>),
}

/// Handle to a running link.
pub struct SyncLink {
    id: NodeID,
    mailbox: mpsc::Sender<LinkEvent>,
    state: watch::Receiver<LinkState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncLink {
    /// Open the local connections, subscribe and spawn the control loop.
    pub async fn start(config: SyncLinkConfig, ctx: LinkContext) -> Result<Self, SyncError> {
        let name = config.name().to_string();
        let control = ctx
            .local
            .connect(&ConnectOptions::new(&ctx.local_uri).name(format!("sync-{}-control", name)))
            .await?;
        let local = ctx
            .local
            .connect(
                &ConnectOptions::new(&ctx.local_uri)
                    .no_echo()
                    .name(format!("sync-{}", name)),
            )
            .await?;

        let client = |bus: Arc<dyn Bus>| {
            NodeClient::new(bus)
                .with_timeout(ctx.defaults.request_timeout())
                .with_retries(ctx.defaults.max_retries)
        };
        let control = client(control);
        let local = client(local);
        let root_local = local.get_root().await?;

        let (mailbox_tx, mailbox_rx) = mpsc::channel(ctx.defaults.mailbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let local_tasks = vec![
            spawn_event_forwarder(
                local.bus().subscribe(subject::ALL_NODE_POINTS).await?,
                mailbox_tx.clone(),
                name.clone(),
                local_node_event,
            ),
            spawn_event_forwarder(
                local.bus().subscribe(subject::ALL_EDGE_POINTS).await?,
                mailbox_tx.clone(),
                name.clone(),
                local_edge_event,
            ),
            spawn_event_forwarder(
                control
                    .bus()
                    .subscribe(&subject::node_points(&config.id))
                    .await?,
                mailbox_tx.clone(),
                name.clone(),
                config_event,
            ),
        ];

        info!(link = %name, uri = %config.uri, root = %root_local.id, "Starting sync link");
        let id = config.id.clone();
        let worker = LinkWorker {
            config,
            defaults: ctx.defaults,
            control,
            local,
            connector: ctx.remote,
            root_local,
            mailbox: mailbox_tx.clone(),
            state: state_tx,
            session: None,
            local_tasks,
        };
        let task = tokio::spawn(worker.run(mailbox_rx, shutdown_rx));

        Ok(Self {
            id,
            mailbox: mailbox_tx,
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Wait until the link reaches `want`; `false` on timeout.
    pub async fn wait_for_state(&self, want: LinkState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == want)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Run a full pass now and return its counters.
    pub async fn sync_now(&self) -> Result<SyncStats, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(LinkEvent::SyncNow(tx))
            .await
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)?
    }

    /// Stop the loop and wait for it to release every subscription and
    /// connection.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(link = %self.id, error = %e, "Sync link task failed");
            }
        }
    }
}

struct Session {
    remote: Arc<dyn Bus>,
    engine: SyncEngine,
    status: watch::Receiver<bool>,
    up_task: JoinHandle<()>,
    subscribed: bool,
    mismatches: MismatchStreak,
}

/// Passes in a row that found different root hashes and moved nothing
/// before the mismatch is reported as an integrity anomaly.
const PERSISTENT_MISMATCH_PASSES: usize = 3;

/// Counts consecutive passes whose root hashes differed but that had
/// nothing to exchange.
#[derive(Debug, Default)]
struct MismatchStreak {
    passes: usize,
}

impl MismatchStreak {
    /// Record one pass; `true` once the streak is persistent.
    fn record(&mut self, stats: &SyncStats) -> bool {
        if stats.root_differed && !stats.changed() {
            self.passes += 1;
        } else {
            self.passes = 0;
        }
        self.passes >= PERSISTENT_MISMATCH_PASSES
    }
}

enum Step {
    Shutdown,
    Event(LinkEvent),
    Connect,
    Tick,
    Lost,
}

enum Action {
    None,
    Reconnect,
    ResetTicker,
}

struct LinkWorker {
    config: SyncLinkConfig,
    defaults: SyncDefaults,
    control: NodeClient,
    local: NodeClient,
    connector: Arc<dyn Connector>,
    root_local: NodeEdge,
    mailbox: mpsc::Sender<LinkEvent>,
    state: watch::Sender<LinkState>,
    session: Option<Session>,
    local_tasks: Vec<JoinHandle<()>>,
}

impl LinkWorker {
    async fn run(mut self, mut mailbox: mpsc::Receiver<LinkEvent>, mut shutdown: oneshot::Receiver<()>) {
        self.check_period().await;
        let mut connect_at = self.initial_connect();
        let mut ticker: Option<Interval> = None;

        loop {
            let step = {
                let status = self.session.as_mut().map(|s| &mut s.status);
                tokio::select! {
                    _ = &mut shutdown => Step::Shutdown,
                    event = mailbox.recv() => event.map_or(Step::Shutdown, Step::Event),
                    _ = wait_until(connect_at) => Step::Connect,
                    _ = wait_tick(ticker.as_mut()) => Step::Tick,
                    _ = wait_lost(status) => Step::Lost,
                }
            };

            match step {
                Step::Shutdown => break,
                Step::Connect => {
                    connect_at = None;
                    match self.connect().await {
                        Ok(()) => {
                            ticker = Some(self.new_ticker());
                            if let Err(e) = self.run_pass().await {
                                warn!(link = %self.config.name(), error = %e, "Initial sync pass failed");
                            }
                        }
                        Err(e) => {
                            let retry = self.defaults.connect_retry();
                            warn!(
                                link = %self.config.name(),
                                uri = %self.config.uri,
                                error = %e,
                                retry_ms = retry.as_millis() as u64,
                                "Failed to connect sync link"
                            );
                            self.set_state(LinkState::Disconnected);
                            connect_at = Some(Instant::now() + retry);
                        }
                    }
                }
                Step::Tick => {
                    if let Err(e) = self.run_pass().await {
                        warn!(link = %self.config.name(), error = %e, "Sync pass failed");
                    }
                }
                Step::Lost => {
                    warn!(link = %self.config.name(), "Remote connection lost");
                    self.disconnect().await;
                    ticker = None;
                    connect_at = Some(Instant::now() + self.defaults.connect_retry());
                }
                Step::Event(event) => match self.handle_event(event).await {
                    Action::None => {}
                    Action::Reconnect => {
                        info!(link = %self.config.name(), "Sync link config changed, reconnecting");
                        self.disconnect().await;
                        ticker = None;
                        connect_at = self.initial_connect();
                    }
                    Action::ResetTicker => {
                        if self.session.is_some() {
                            ticker = Some(self.new_ticker());
                        }
                    }
                },
            }
        }

        mailbox.close();
        self.teardown().await;
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(link = %self.config.name(), from = %current, to = %state, "Link state change");
                *current = state;
                true
            }
        });
    }

    fn initial_connect(&self) -> Option<Instant> {
        if self.config.disable {
            info!(link = %self.config.name(), "Sync link disabled");
            self.set_state(LinkState::Disabled);
            None
        } else {
            self.set_state(LinkState::Disconnected);
            Some(Instant::now() + self.defaults.initial_connect_delay())
        }
    }

    fn new_ticker(&self) -> Interval {
        let period = self.config.period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        self.set_state(LinkState::Connecting);
        let name = self.config.name().to_string();
        let opts = ConnectOptions::new(&self.config.uri)
            .auth_token(&self.config.auth_token)
            .no_echo()
            .name(format!("sync-{}-remote", name));
        let remote = self.connector.connect(&opts).await?;

        let up = match remote
            .subscribe(&subject::up_edges_under(&self.root_local.id))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                remote.close().await;
                return Err(e.into());
            }
        };
        let up_task = spawn_event_forwarder(up, self.mailbox.clone(), name.clone(), remote_edge_event);

        let remote_client = NodeClient::new(remote.clone())
            .with_timeout(self.defaults.request_timeout())
            .with_retries(self.defaults.max_retries);
        let engine = SyncEngine::new(
            self.local.clone(),
            remote_client,
            self.root_local.clone(),
            self.config.id.clone(),
        );
        self.session = Some(Session {
            status: remote.status(),
            remote,
            engine,
            up_task,
            subscribed: false,
            mismatches: MismatchStreak::default(),
        });
        self.set_state(LinkState::Connected);
        info!(link = %name, uri = %self.config.uri, "Sync link connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.up_task.abort();
            let _ = session.up_task.await;
            session.engine.shutdown().await;
            session.remote.close().await;
            info!(link = %self.config.name(), "Sync link disconnected");
        }
        self.set_state(if self.config.disable {
            LinkState::Disabled
        } else {
            LinkState::Disconnected
        });
    }

    async fn teardown(&mut self) {
        self.disconnect().await;
        for task in self.local_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.local.bus().close().await;
        self.control.bus().close().await;
        info!(link = %self.config.name(), "Sync link stopped");
    }

    /// Full pass from the local root.
    async fn run_pass(&mut self) -> Result<SyncStats, SyncError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SyncError::NotConnected);
        };
        let stats = session.engine.sync_root().await?;
        if !session.subscribed {
            let root = self.root_local.id.clone();
            session
                .engine
                .subscribe_tree(ROOT_PARENT, &root)
                .await?;
            session.subscribed = true;
        }
        if session.mismatches.record(&stats) {
            error!(
                link = %self.config.name(),
                root = %self.root_local.id,
                passes = session.mismatches.passes,
                "Root hashes still differ after passes that exchanged nothing"
            );
        }
        if stats.root_differed {
            self.bump_sync_count().await;
        }
        if stats.changed() || stats.failures > 0 {
            info!(
                link = %self.config.name(),
                visited = stats.visited,
                pushed = stats.nodes_pushed,
                pulled = stats.nodes_pulled,
                points_pushed = stats.points_pushed,
                points_pulled = stats.points_pulled,
                failures = stats.failures,
                "Sync pass complete"
            );
        } else {
            debug!(link = %self.config.name(), visited = stats.visited, "Sync pass found no changes");
        }
        Ok(stats)
    }

    async fn handle_event(&mut self, event: LinkEvent) -> Action {
        match event {
            LinkEvent::ConfigPoints(points) => return self.apply_config(points).await,
            LinkEvent::SyncNow(reply) => {
                let result = self.run_pass().await;
                let _ = reply.send(result);
            }
            LinkEvent::LocalNodePoints { id, payload } => {
                self.forward_local(&subject::node_points(&id), &id, payload)
                    .await;
            }
            LinkEvent::LocalEdgePoints {
                id,
                parent,
                payload,
                new_edge,
            } => {
                if id == self.root_local.id {
                    return Action::None;
                }
                self.forward_local(&subject::edge_points(&id, &parent), &id, payload)
                    .await;
                if new_edge {
                    self.new_edge(&parent, &id).await;
                }
            }
            LinkEvent::RemoteNewEdge { id, parent } => self.new_edge(&parent, &id).await,
        }
        Action::None
    }

    async fn forward_local(&self, subject: &str, id: &str, payload: Vec<u8>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.engine.is_registered(id) {
            return;
        }
        if let Err(e) = session.remote.publish(subject, payload).await {
            warn!(link = %self.config.name(), subject = %subject, error = %e, "Failed to forward local points");
        }
    }

    async fn new_edge(&mut self, parent: &str, id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.engine.handle_new_edge(parent, id).await {
            warn!(link = %self.config.name(), node = %id, parent = %parent, error = %e, "Failed to sync new edge");
        }
    }

    async fn apply_config(&mut self, points: Vec<Point>) -> Action {
        let change = self.config.merge_points(points.iter());

        if self.config.sync_count_reset {
            self.config.sync_count = 0;
            self.config.sync_count_reset = false;
            self.publish_config(vec![
                Point::new(point_type::SYNC_COUNT, 0.0),
                Point::new(point_type::SYNC_COUNT_RESET, 0.0),
            ])
            .await;
        }

        if change.reconnect {
            Action::Reconnect
        } else if change.period {
            self.check_period().await;
            Action::ResetTicker
        } else {
            Action::None
        }
    }

    /// Replace a missing or invalid period with the default and publish it.
    async fn check_period(&mut self) {
        if self.config.period >= 1 {
            return;
        }
        self.config.period = self.defaults.period_secs as i64;
        info!(link = %self.config.name(), period = self.config.period, "Using default sync period");
        self.publish_config(vec![Point::new(point_type::PERIOD, self.config.period as f64)])
            .await;
    }

    async fn bump_sync_count(&mut self) {
        self.config.sync_count += 1;
        self.publish_config(vec![Point::new(
            point_type::SYNC_COUNT,
            self.config.sync_count as f64,
        )])
        .await;
    }

    async fn publish_config(&self, points: Vec<Point>) {
        let points: Vec<Point> = points
            .into_iter()
            .map(|p| p.with_origin(self.config.id.clone()))
            .collect();
        if let Err(e) = self
            .control
            .send_node_points(&self.config.id, &points, true)
            .await
        {
            warn!(link = %self.config.name(), error = %e, "Failed to update sync link node");
        }
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_lost(status: Option<&mut watch::Receiver<bool>>) {
    let Some(status) = status else {
        return std::future::pending().await;
    };
    loop {
        let connected = *status.borrow_and_update();
        if !connected {
            return;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}

/// Feed a subscription into the mailbox. A full mailbox is logged and then
/// waited on.
fn spawn_event_forwarder<F>(
    mut sub: Subscription,
    mailbox: mpsc::Sender<LinkEvent>,
    link: String,
    map: F,
) -> JoinHandle<()>
where
    F: Fn(Message) -> Option<LinkEvent> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            let Some(event) = map(msg) else {
                continue;
            };
            match mailbox.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(link = %link, subject = %sub.subject(), "Sync link mailbox full, waiting");
                    if mailbox.send(event).await.is_err() {
                        break;
                    }
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}

/// Whether a batch of edge points carries a live tombstone point.
fn announces_edge(payload: &[u8]) -> bool {
    codec::decode_points(payload)
        .map(|points| {
            points
                .iter()
                .any(|p| p.typ == point_type::TOMBSTONE && !p.as_bool())
        })
        .unwrap_or(false)
}

fn local_node_event(msg: Message) -> Option<LinkEvent> {
    match subject::parse(&msg.subject)? {
        Subject::NodePoints { id } => Some(LinkEvent::LocalNodePoints {
            id,
            payload: msg.payload,
        }),
        _ => None,
    }
}

fn local_edge_event(msg: Message) -> Option<LinkEvent> {
    match subject::parse(&msg.subject)? {
        Subject::EdgePoints { id, parent } => Some(LinkEvent::LocalEdgePoints {
            new_edge: announces_edge(&msg.payload),
            id,
            parent,
            payload: msg.payload,
        }),
        _ => None,
    }
}

fn remote_edge_event(msg: Message) -> Option<LinkEvent> {
    match subject::parse(&msg.subject)? {
        Subject::UpEdge { id, parent, .. } if announces_edge(&msg.payload) => {
            Some(LinkEvent::RemoteNewEdge { id, parent })
        }
        _ => None,
    }
}

fn config_event(msg: Message) -> Option<LinkEvent> {
    match codec::decode_points(&msg.payload) {
        Ok(points) => Some(LinkEvent::ConfigPoints(points.into_inner())),
        Err(e) => {
            warn!(subject = %msg.subject, error = %e, "Malformed sync config points");
            None
        }
    }
}
