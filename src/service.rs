//! Store service: binds a [`SledStore`] to a bus.
//!
//! Answers `nodes.<parent>.<id>` requests, applies `p.<id>` and
//! `p.<id>.<parent>` batches (acking them when sent as requests) and
//! publishes derived edge notifications:
//! - `p.<id>.<parent>` for edges changed by `addParent` / `removeParent`
//!   directives or created implicitly,
//! - `up.<ancestor>.<id>.<parent>` for every edge change, once per ancestor
//!   of the edge's parent (the parent included).

use crate::bus::{self, Bus, Message, Subscription};
use crate::codec::{self, Ack, NodesRequest, NodesResponse};
use crate::error::BusError;
use crate::store::{ApplyOutcome, NodeFilter, SledStore, TouchedEdge};
use crate::subject::{self, Subject};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub struct StoreService {
    store: Arc<SledStore>,
    bus: Arc<dyn Bus>,
}

/// Running service tasks. Dropping the handle stops the service.
pub struct ServiceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub async fn stop(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl StoreService {
    pub fn new(store: Arc<SledStore>, bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self { store, bus })
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    /// Subscribe and spawn one handler task per subject family.
    pub async fn start(self: &Arc<Self>) -> Result<ServiceHandle, BusError> {
        let mut tasks = Vec::new();
        for pattern in [
            subject::ALL_NODE_POINTS,
            subject::ALL_EDGE_POINTS,
            subject::ALL_NODE_REQUESTS,
        ] {
            let sub = self.bus.subscribe(pattern).await?;
            let service = Arc::clone(self);
            tasks.push(tokio::spawn(async move { service.serve(sub).await }));
        }
        Ok(ServiceHandle { tasks })
    }

    async fn serve(&self, mut sub: Subscription) {
        while let Some(msg) = sub.next().await {
            self.handle(msg).await;
        }
        debug!(subject = %sub.subject(), "Store service subscription closed");
    }

    /// Process one message.
    pub async fn handle(&self, msg: Message) {
        match subject::parse(&msg.subject) {
            Some(Subject::NodePoints { id }) => {
                let store = self.store.clone();
                let payload = msg.payload.clone();
                let result = apply_blocking(move || {
                    let points = codec::decode_points(&payload).map_err(|e| e.to_string())?;
                    store.node_points(&id, points).map_err(|e| e.to_string())
                })
                .await;
                self.finish_points(&msg, result).await;
            }
            Some(Subject::EdgePoints { id, parent }) => {
                let store = self.store.clone();
                let payload = msg.payload.clone();
                let result = apply_blocking(move || {
                    let points = codec::decode_points(&payload).map_err(|e| e.to_string())?;
                    store
                        .edge_points(&id, &parent, points)
                        .map_err(|e| e.to_string())
                })
                .await;
                self.finish_points(&msg, result).await;
            }
            Some(Subject::Nodes { parent, id }) => {
                let response = self.query(&parent, &id, &msg.payload);
                match codec::encode(&response) {
                    Ok(payload) => self.reply(&msg, payload).await,
                    Err(e) => error!(subject = %msg.subject, error = %e, "Failed to encode nodes reply"),
                }
            }
            _ => warn!(subject = %msg.subject, "Store service ignoring unknown subject"),
        }
    }

    fn query(&self, parent: &str, id: &str, payload: &[u8]) -> NodesResponse {
        let request: NodesRequest = if payload.is_empty() {
            NodesRequest::default()
        } else {
            match codec::decode(payload) {
                Ok(request) => request,
                Err(e) => {
                    return NodesResponse {
                        error: e.to_string(),
                        nodes: Vec::new(),
                    }
                }
            }
        };
        let filter = NodeFilter {
            typ: Some(request.typ).filter(|t| !t.is_empty()),
            include_deleted: request.include_deleted,
        };
        match self.store.get_nodes(parent, id, &filter) {
            Ok(nodes) => NodesResponse {
                error: String::new(),
                nodes,
            },
            Err(e) => NodesResponse {
                error: e.to_string(),
                nodes: Vec::new(),
            },
        }
    }

    async fn finish_points(&self, msg: &Message, result: Result<ApplyOutcome, String>) {
        let ack = match result {
            Ok(outcome) => {
                self.notify(&outcome.edges, msg).await;
                Ack::ok()
            }
            Err(e) => {
                error!(subject = %msg.subject, error = %e, "Failed to apply points");
                Ack::error(e)
            }
        };
        if msg.reply.is_some() {
            match codec::encode(&ack) {
                Ok(payload) => self.reply(msg, payload).await,
                Err(e) => error!(subject = %msg.subject, error = %e, "Failed to encode ack"),
            }
        }
    }

    async fn notify(&self, edges: &[TouchedEdge], msg: &Message) {
        for edge in edges {
            let payload = match codec::encode_points(&edge.points) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(node = %edge.id, error = %e, "Failed to encode edge notification");
                    continue;
                }
            };

            let edge_subject = subject::edge_points(&edge.id, &edge.parent);
            if edge_subject != msg.subject {
                self.publish(&edge_subject, payload.clone()).await;
            }

            let mut ancestors = vec![edge.parent.clone()];
            match self.store.ancestors(&edge.parent) {
                Ok(above) => ancestors.extend(above),
                Err(e) => warn!(node = %edge.parent, error = %e, "Failed to list ancestors"),
            }
            for ancestor in ancestors.iter().filter(|a| subject::is_valid_id(a)) {
                self.publish(&subject::up_edge(ancestor, &edge.id, &edge.parent), payload.clone())
                    .await;
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) {
        if let Err(e) = self.bus.publish(subject, payload).await {
            warn!(subject = %subject, error = %e, "Failed to publish notification");
        }
    }

    async fn reply(&self, msg: &Message, payload: Vec<u8>) {
        if let Err(e) = bus::respond(self.bus.as_ref(), msg, payload).await {
            warn!(subject = %msg.subject, error = %e, "Failed to send reply");
        }
    }
}

/// Run a store write on the blocking pool; transactions and hash
/// propagation hold the store's write lock for their whole duration.
async fn apply_blocking<F>(op: F) -> Result<ApplyOutcome, String>
where
    F: FnOnce() -> Result<ApplyOutcome, String> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| format!("store write task failed: {}", e))?
}
