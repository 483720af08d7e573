//! In-process bus.
//!
//! A [`MemoryServer`] routes messages between its connections. A
//! [`MemoryNetwork`] maps URIs to servers and can make a server unreachable,
//! which drops every connection made through the network to that URI.

use crate::bus::{Bus, ConnectOptions, Connector, Message, Subscription};
use crate::error::BusError;
use crate::subject;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

struct SubEntry {
    conn: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct ServerInner {
    auth_token: Option<String>,
    subs: RwLock<BTreeMap<u64, SubEntry>>,
    next_id: AtomicU64,
}

impl ServerInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server that only accepts connections presenting `token`.
    pub fn with_auth_token(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                auth_token: Some(token.into()),
                ..Default::default()
            }),
        }
    }

    /// In-process connection with echo enabled and no authentication.
    pub fn connect(&self) -> Arc<MemoryConnection> {
        Arc::new(MemoryConnection::new(
            self.inner.clone(),
            false,
            String::new(),
        ))
    }

    pub fn connect_with(&self, opts: &ConnectOptions) -> Result<Arc<MemoryConnection>, BusError> {
        if let Some(expected) = &self.inner.auth_token {
            if expected != &opts.auth_token {
                return Err(BusError::ConnectionFailed(
                    "authorization violation".to_string(),
                ));
            }
        }
        Ok(Arc::new(MemoryConnection::new(
            self.inner.clone(),
            opts.no_echo,
            opts.name.clone(),
        )))
    }

    /// Number of live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// Subscription patterns currently registered, for diagnostics.
    pub fn subscription_patterns(&self) -> Vec<String> {
        self.inner
            .subs
            .read()
            .values()
            .map(|s| s.pattern.clone())
            .collect()
    }
}

pub struct MemoryConnection {
    id: u64,
    server: Arc<ServerInner>,
    no_echo: bool,
    name: String,
    closed: AtomicBool,
    status_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<bool>,
}

impl MemoryConnection {
    fn new(server: Arc<ServerInner>, no_echo: bool, name: String) -> Self {
        let (status_tx, status_rx) = watch::channel(true);
        Self {
            id: server.next_id(),
            server,
            no_echo,
            name,
            closed: AtomicBool::new(false),
            status_tx,
            status_rx,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            Err(BusError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn deliver(
        &self,
        subject: &str,
        reply: Option<String>,
        payload: Vec<u8>,
    ) -> Result<usize, BusError> {
        self.check_open()?;
        if subject.is_empty() || subject.contains('*') || subject.contains('>') {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }

        let subs = self.server.subs.read();
        let mut delivered = 0;
        for entry in subs.values() {
            if self.no_echo && entry.conn == self.id {
                continue;
            }
            if !subject::matches(&entry.pattern, subject) {
                continue;
            }
            let msg = Message {
                subject: subject.to_string(),
                reply: reply.clone(),
                payload: payload.clone(),
            };
            if entry.tx.send(msg).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn subscribe_now(&self, pattern: &str) -> Result<Subscription, BusError> {
        self.check_open()?;
        if pattern.is_empty() {
            return Err(BusError::InvalidSubject(pattern.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.server.next_id();
        self.server.subs.write().insert(
            sub_id,
            SubEntry {
                conn: self.id,
                pattern: pattern.to_string(),
                tx,
            },
        );
        let server: Weak<ServerInner> = Arc::downgrade(&self.server);
        Ok(Subscription::new(pattern, rx, move || {
            if let Some(server) = server.upgrade() {
                server.subs.write().remove(&sub_id);
            }
        }))
    }

    /// Close the connection and drop all of its subscriptions.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.server.subs.write().retain(|_, s| s.conn != self.id);
        let _ = self.status_tx.send(false);
        debug!(connection = %self.name, "Memory bus connection closed");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl Bus for MemoryConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.deliver(subject, None, payload).map(|_| ())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let mut replies = self.subscribe_now(&inbox)?;
        if self.deliver(subject, Some(inbox), payload)? == 0 {
            return Err(BusError::NoResponders(subject.to_string()));
        }
        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BusError::Disconnected),
            Err(_) => Err(BusError::Timeout(subject.to_string())),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.subscribe_now(subject)
    }

    fn status(&self) -> watch::Receiver<bool> {
        self.status_rx.clone()
    }

    async fn close(&self) {
        self.shutdown();
    }
}

#[derive(Default)]
struct NetworkInner {
    servers: HashMap<String, MemoryServer>,
    unreachable: HashSet<String>,
    connections: HashMap<String, Vec<Weak<MemoryConnection>>>,
}

/// URI-addressed set of memory servers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, uri: impl Into<String>, server: MemoryServer) {
        self.inner.lock().servers.insert(uri.into(), server);
    }

    pub fn server(&self, uri: &str) -> Option<MemoryServer> {
        self.inner.lock().servers.get(uri).cloned()
    }

    /// Make `uri` unreachable (dropping its network connections) or
    /// reachable again.
    pub fn set_reachable(&self, uri: &str, reachable: bool) {
        let mut inner = self.inner.lock();
        if reachable {
            inner.unreachable.remove(uri);
            return;
        }
        inner.unreachable.insert(uri.to_string());
        if let Some(conns) = inner.connections.remove(uri) {
            for conn in conns.iter().filter_map(Weak::upgrade) {
                conn.shutdown();
            }
        }
        info!(uri = %uri, "Memory server unreachable");
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn connect(&self, opts: &ConnectOptions) -> Result<Arc<dyn Bus>, BusError> {
        let mut inner = self.inner.lock();
        if inner.unreachable.contains(&opts.uri) {
            return Err(BusError::ConnectionFailed(format!(
                "{} is unreachable",
                opts.uri
            )));
        }
        let server = inner
            .servers
            .get(&opts.uri)
            .cloned()
            .ok_or_else(|| BusError::ConnectionFailed(format!("no server at {}", opts.uri)))?;
        let conn = server.connect_with(opts)?;
        let conns = inner.connections.entry(opts.uri.clone()).or_default();
        conns.retain(|w| w.strong_count() > 0);
        conns.push(Arc::downgrade(&conn));
        Ok(conn as Arc<dyn Bus>)
    }
}
