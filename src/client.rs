//! Remote accessor: fetch NodeEdges and send points over a bus connection.

use crate::bus::Bus;
use crate::codec::{self, Ack, NodesRequest, NodesResponse};
use crate::error::{AccessError, BusError};
use crate::node::NodeEdge;
use crate::point::{point_type, Point};
use crate::subject;
use crate::types::{PARENT_NONE, ROOT_PARENT, SELECT_ALL};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Query options for [`NodeClient::get_nodes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetNodesOptions {
    pub typ: Option<String>,
    pub include_deleted: bool,
}

impl GetNodesOptions {
    pub fn including_deleted() -> Self {
        Self {
            typ: None,
            include_deleted: true,
        }
    }
}

#[derive(Clone)]
pub struct NodeClient {
    bus: Arc<dyn Bus>,
    timeout: Duration,
    retries: usize,
}

impl NodeClient {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts for fetches and acknowledged sends that time out.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Fetch NodeEdges through `nodes.<parent>.<id>`, retrying timeouts.
    pub async fn get_nodes(
        &self,
        parent: &str,
        id: &str,
        opts: &GetNodesOptions,
    ) -> Result<Vec<NodeEdge>, AccessError> {
        let subject = subject::nodes(parent, id);
        let request = NodesRequest {
            typ: opts.typ.clone().unwrap_or_default(),
            include_deleted: opts.include_deleted,
        };
        let payload = codec::encode(&request).map_err(|e| AccessError::Decode {
            subject: subject.clone(),
            reason: e.to_string(),
        })?;

        let bus = self.bus.clone();
        let timeout = self.timeout;
        let target = subject.as_str();
        let reply = with_retry(target, self.retries, || {
            let bus = bus.clone();
            let payload = payload.clone();
            async move { bus.request(target, payload, timeout).await }
        })
        .await?;
        let response: NodesResponse =
            codec::decode(&reply.payload).map_err(|e| AccessError::Decode {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;
        if !response.error.is_empty() {
            return Err(AccessError::Remote(response.error));
        }
        Ok(response.nodes)
    }

    /// A single NodeEdge; `NotFound` when nothing matches.
    pub async fn get_node(&self, parent: &str, id: &str) -> Result<NodeEdge, AccessError> {
        self.get_nodes(parent, id, &GetNodesOptions::including_deleted())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AccessError::NotFound(format!("{}/{}", parent, id)))
    }

    pub async fn get_children(
        &self,
        parent: &str,
        opts: &GetNodesOptions,
    ) -> Result<Vec<NodeEdge>, AccessError> {
        self.get_nodes(parent, SELECT_ALL, opts).await
    }

    /// The root node as seen through its sentinel edge.
    pub async fn get_root(&self) -> Result<NodeEdge, AccessError> {
        self.get_nodes(ROOT_PARENT, SELECT_ALL, &GetNodesOptions::default())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AccessError::NotFound("root".to_string()))
    }

    pub async fn send_node_points(
        &self,
        id: &str,
        points: &[Point],
        ack: bool,
    ) -> Result<(), AccessError> {
        self.send_points(&subject::node_points(id), points, ack).await
    }

    pub async fn send_edge_points(
        &self,
        id: &str,
        parent: &str,
        points: &[Point],
        ack: bool,
    ) -> Result<(), AccessError> {
        self.send_points(&subject::edge_points(id, parent), points, ack)
            .await
    }

    /// Recreate `node` under `parent`: node points, type and an `addParent`
    /// directive in one batch, then the edge points.
    ///
    /// The directive carries the time of a live edge tombstone point, or the
    /// Unix epoch for a deleted edge, so the receiving edge ends up with the
    /// same tombstone point as the source.
    pub async fn send_node(&self, node: &NodeEdge, parent: &str, origin: &str) -> Result<(), AccessError> {
        let mut points: Vec<Point> = node.points.iter().cloned().collect();
        points.push(Point::text(point_type::NODE_TYPE, node.typ.clone()).with_origin(origin));

        if parent != PARENT_NONE && parent != ROOT_PARENT {
            points.push(
                Point::text(point_type::ADD_PARENT, parent)
                    .at(add_parent_time(node))
                    .with_origin(origin),
            );
        }

        self.send_node_points(&node.id, &points, true).await?;

        if !node.edge_points.is_empty() && parent != PARENT_NONE {
            let edge_points: Vec<Point> = node.edge_points.iter().cloned().collect();
            self.send_edge_points(&node.id, parent, &edge_points, true)
                .await?;
        }
        Ok(())
    }

    async fn send_points(&self, subject: &str, points: &[Point], ack: bool) -> Result<(), AccessError> {
        let payload = codec::encode_points(points).map_err(|e| AccessError::Decode {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

        if !ack {
            self.bus.publish(subject, payload).await?;
            return Ok(());
        }

        let bus = self.bus.clone();
        let timeout = self.timeout;
        let reply = with_retry(subject, self.retries, || {
            let bus = bus.clone();
            let payload = payload.clone();
            async move { bus.request(subject, payload, timeout).await }
        })
        .await?;

        let ack: Ack = codec::decode(&reply.payload).map_err(|e| AccessError::Decode {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
        if ack.error.is_empty() {
            Ok(())
        } else {
            Err(AccessError::Remote(ack.error))
        }
    }
}

fn add_parent_time(node: &NodeEdge) -> DateTime<Utc> {
    match node.edge_points.find(point_type::TOMBSTONE, "") {
        Some(p) if !p.as_bool() => p.time,
        _ => DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// Run `op` up to `retries + 1` times while it times out.
pub async fn with_retry<T, F, Fut>(subject: &str, retries: usize, mut op: F) -> Result<T, BusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BusError>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(BusError::Timeout(s)) if attempt < retries => {
                attempt += 1;
                warn!(subject = %s, attempt, max_retries = retries, "Request timed out, retrying");
            }
            Err(e) => {
                if attempt > 0 {
                    warn!(subject = %subject, attempts = attempt + 1, error = %e, "Request failed after retries");
                }
                return Err(e);
            }
        }
    }
}
