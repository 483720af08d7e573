//! Tree sync between a local and a remote store.
//!
//! [`SyncEngine::sync_node`] walks the tree top-down, stopping wherever the
//! two sides report the same hash. Nodes found on one side only are copied
//! whole; nodes on both sides with different hashes get a last-write-wins
//! point merge in both directions before their children are compared.
//!
//! Every node the engine touches is registered: the engine subscribes to its
//! remote point subjects and republishes them locally, and the link forwards
//! local batches for registered nodes to the remote.

use crate::bus::Bus;
use crate::client::{GetNodesOptions, NodeClient};
use crate::error::SyncError;
use crate::node::NodeEdge;
use crate::point::{Point, Points};
use crate::subject;
use crate::types::{short_hash, NodeID, MAX_TREE_DEPTH, PARENT_NONE, ROOT_PARENT};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub visited: usize,
    pub nodes_pushed: usize,
    pub nodes_pulled: usize,
    pub points_pushed: usize,
    pub points_pulled: usize,
    /// Sends that failed after retries; the next pass picks them up.
    pub failures: usize,
    /// The root hashes differed when the pass started.
    pub root_differed: bool,
}

impl SyncStats {
    pub fn changed(&self) -> bool {
        self.nodes_pushed + self.nodes_pulled + self.points_pushed + self.points_pulled > 0
    }
}

/// Split two point sets into what each side is missing.
///
/// Returns `(push, pull)`: local points that are newer or absent remotely,
/// and remote points that are newer or absent locally. Equal times move
/// nothing.
pub fn diff_points(local: &Points, remote: &Points) -> (Vec<Point>, Vec<Point>) {
    let mut push = Vec::new();
    let mut pull = Vec::new();
    for p in local.iter() {
        match remote.find(&p.typ, &p.key) {
            Some(r) if r.time > p.time => pull.push(r.clone()),
            Some(r) if r.time < p.time => push.push(p.clone()),
            Some(_) => {}
            None => push.push(p.clone()),
        }
    }
    for r in remote.iter() {
        if local.find(&r.typ, &r.key).is_none() {
            pull.push(r.clone());
        }
    }
    (push, pull)
}

struct Visit {
    parent: NodeID,
    id: NodeID,
    depth: usize,
}

/// Remote-to-local forwarding for registered nodes.
struct Forwarders {
    local: Arc<dyn Bus>,
    remote: Arc<dyn Bus>,
    tasks: HashMap<String, JoinHandle<()>>,
    registered: HashSet<NodeID>,
}

impl Forwarders {
    async fn forward(&mut self, subject: String) {
        if self.tasks.contains_key(&subject) {
            return;
        }
        let mut sub = match self.remote.subscribe(&subject).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Failed to subscribe to remote subject");
                return;
            }
        };
        let local = self.local.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                if let Err(e) = local.publish(&msg.subject, msg.payload).await {
                    warn!(subject = %msg.subject, error = %e, "Failed to forward remote points");
                }
            }
        });
        self.tasks.insert(subject, task);
    }

    async fn shutdown(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
            let _ = task.await;
        }
        self.registered.clear();
    }
}

pub struct SyncEngine {
    local: NodeClient,
    remote: NodeClient,
    root_local: NodeEdge,
    root_remote: Option<NodeEdge>,
    /// Origin stamped on generated points (the link's config node).
    origin: String,
    forwarders: Forwarders,
}

impl SyncEngine {
    pub fn new(local: NodeClient, remote: NodeClient, root_local: NodeEdge, origin: impl Into<String>) -> Self {
        let forwarders = Forwarders {
            local: local.bus().clone(),
            remote: remote.bus().clone(),
            tasks: HashMap::new(),
            registered: HashSet::new(),
        };
        Self {
            local,
            remote,
            root_local,
            root_remote: None,
            origin: origin.into(),
            forwarders,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_local.id
    }

    /// The remote root, once fetched.
    pub fn root_remote(&self) -> Option<&NodeEdge> {
        self.root_remote.as_ref()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.forwarders.registered.contains(id)
    }

    pub fn registered_count(&self) -> usize {
        self.forwarders.registered.len()
    }

    async fn remote_root_id(&mut self) -> Result<NodeID, SyncError> {
        if let Some(root) = &self.root_remote {
            return Ok(root.id.clone());
        }
        let root = self.remote.get_root().await?;
        info!(remote_root = %root.id, local_root = %self.root_local.id, "Fetched remote root");
        let id = root.id.clone();
        self.root_remote = Some(root);
        Ok(id)
    }

    /// Pass over the full local tree.
    pub async fn sync_root(&mut self) -> Result<SyncStats, SyncError> {
        let root = self.root_local.id.clone();
        self.sync_node(ROOT_PARENT, &root).await
    }

    /// Reconcile `(parent, id)` and everything below it that differs.
    pub async fn sync_node(&mut self, parent: &str, id: &str) -> Result<SyncStats, SyncError> {
        self.remote_root_id().await?;
        let mut stats = SyncStats::default();
        let mut work = vec![Visit {
            parent: parent.to_string(),
            id: id.to_string(),
            depth: 0,
        }];
        while let Some(visit) = work.pop() {
            if visit.depth > MAX_TREE_DEPTH {
                return Err(SyncError::DepthExceeded {
                    node: visit.id,
                    limit: MAX_TREE_DEPTH,
                });
            }
            stats.visited += 1;
            self.visit(visit, &mut work, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn visit(&mut self, visit: Visit, work: &mut Vec<Visit>, stats: &mut SyncStats) -> Result<(), SyncError> {
        let is_root = visit.id == self.root_local.id;
        let remote_root = self.remote_root_id().await?;
        let opts = GetNodesOptions::including_deleted();

        let (local_parent, remote_parent, fetch_parent) = if is_root {
            (ROOT_PARENT.to_string(), remote_root, PARENT_NONE.to_string())
        } else {
            (visit.parent.clone(), visit.parent.clone(), visit.parent.clone())
        };

        let local = first(self.local.get_nodes(&fetch_parent, &visit.id, &opts).await?);
        let remote = first(self.remote.get_nodes(&fetch_parent, &visit.id, &opts).await?);

        let (local, remote) = match (local, remote) {
            (None, None) => return Err(SyncError::Missing(visit.id)),
            (Some(local), None) => {
                self.push_tree(local, &remote_parent, visit.depth, stats).await?;
                return Ok(());
            }
            (None, Some(remote)) => {
                self.pull_tree(remote, &local_parent, visit.depth, stats).await?;
                return Ok(());
            }
            (Some(local), Some(remote)) => (local, remote),
        };

        self.register(&local_parent, &visit.id).await;

        if is_root {
            self.restore_root_placement(&visit.id, &remote_parent, stats)
                .await?;
        }

        if local.hash == remote.hash {
            return Ok(());
        }
        if is_root {
            stats.root_differed = true;
        }
        debug!(
            node = %local.desc(),
            local_hash = %short_hash(&local.hash),
            remote_hash = %short_hash(&remote.hash),
            "Hashes differ"
        );

        let (push, pull) = diff_points(&local.points, &remote.points);
        self.exchange(&visit.id, None, &push, &pull, stats).await;

        if !is_root {
            let (push, pull) = diff_points(&local.edge_points, &remote.edge_points);
            let parents = Some((local_parent.as_str(), remote_parent.as_str()));
            self.exchange(&visit.id, parents, &push, &pull, stats).await;
        }

        let local_children = self.local.get_children(&visit.id, &opts).await?;
        let remote_children = self.remote.get_children(&visit.id, &opts).await?;

        for child in &local_children {
            match remote_children.iter().find(|r| r.id == child.id) {
                Some(r) if r.hash == child.hash => self.register(&visit.id, &child.id).await,
                Some(_) => work.push(Visit {
                    parent: visit.id.clone(),
                    id: child.id.clone(),
                    depth: visit.depth + 1,
                }),
                None => {
                    self.push_tree(child.clone(), &visit.id, visit.depth + 1, stats)
                        .await?
                }
            }
        }
        let local_ids: HashSet<&str> = local_children.iter().map(|c| c.id.as_str()).collect();
        for child in remote_children.iter().filter(|r| !local_ids.contains(r.id.as_str())) {
            self.pull_tree(child.clone(), &visit.id, visit.depth + 1, stats)
                .await?;
        }
        Ok(())
    }

    /// Undelete the local root under the remote root when that edge is
    /// tombstoned.
    ///
    /// The local root has no up-edge to merge against, so the detached
    /// comparison never sees this tombstone. A live tombstone stamped now
    /// outranks it.
    async fn restore_root_placement(&self, id: &str, remote_root: &str, stats: &mut SyncStats) -> Result<(), SyncError> {
        let opts = GetNodesOptions::including_deleted();
        let placement = first(self.remote.get_nodes(remote_root, id, &opts).await?);
        if !placement.map_or(false, |p| p.is_tombstone()) {
            return Ok(());
        }
        info!(node = %id, remote_root = %remote_root, "Undeleting local root on remote");
        let undelete = [Point::tombstone(false)
            .at(Utc::now())
            .with_origin(self.origin.clone())];
        self.exchange(id, Some((ROOT_PARENT, remote_root)), &undelete, &[], stats)
            .await;
        Ok(())
    }

    /// Send point differences both ways. `parents` is `(local, remote)` for
    /// edge points, `None` for node points.
    async fn exchange(
        &self,
        id: &str,
        parents: Option<(&str, &str)>,
        push: &[Point],
        pull: &[Point],
        stats: &mut SyncStats,
    ) {
        if !push.is_empty() {
            let sent = match parents {
                None => self.remote.send_node_points(id, push, true).await,
                Some((_, remote_parent)) => {
                    self.remote
                        .send_edge_points(id, remote_parent, push, true)
                        .await
                }
            };
            match sent {
                Ok(()) => stats.points_pushed += push.len(),
                Err(e) => {
                    stats.failures += 1;
                    warn!(node = %id, edge = parents.is_some(), error = %e, "Failed to push points");
                }
            }
        }
        if !pull.is_empty() {
            let sent = match parents {
                None => self.local.send_node_points(id, pull, true).await,
                Some((local_parent, _)) => {
                    self.local
                        .send_edge_points(id, local_parent, pull, true)
                        .await
                }
            };
            match sent {
                Ok(()) => stats.points_pulled += pull.len(),
                Err(e) => {
                    stats.failures += 1;
                    warn!(node = %id, edge = parents.is_some(), error = %e, "Failed to pull points");
                }
            }
        }
    }

    /// Copy a local subtree to the remote under `parent`.
    async fn push_tree(&mut self, node: NodeEdge, parent: &str, depth: usize, stats: &mut SyncStats) -> Result<(), SyncError> {
        let opts = GetNodesOptions::including_deleted();
        let mut stack = vec![(node, parent.to_string(), depth)];
        while let Some((node, parent, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(SyncError::DepthExceeded {
                    node: node.id,
                    limit: MAX_TREE_DEPTH,
                });
            }
            if let Err(e) = self.remote.send_node(&node, &parent, &self.origin).await {
                stats.failures += 1;
                warn!(node = %node.desc(), parent = %parent, error = %e, "Failed to push node");
                continue;
            }
            stats.nodes_pushed += 1;
            info!(node = %node.desc(), parent = %parent, "Pushed node to remote");

            let local_parent = if node.id == self.root_local.id {
                ROOT_PARENT.to_string()
            } else {
                parent.clone()
            };
            self.register(&local_parent, &node.id).await;

            for child in self.local.get_children(&node.id, &opts).await? {
                stack.push((child, node.id.clone(), depth + 1));
            }
        }
        Ok(())
    }

    /// Copy a remote subtree to the local store under `parent`.
    async fn pull_tree(&mut self, node: NodeEdge, parent: &str, depth: usize, stats: &mut SyncStats) -> Result<(), SyncError> {
        let opts = GetNodesOptions::including_deleted();
        let mut stack = vec![(node, parent.to_string(), depth)];
        while let Some((node, parent, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(SyncError::DepthExceeded {
                    node: node.id,
                    limit: MAX_TREE_DEPTH,
                });
            }
            if let Err(e) = self.local.send_node(&node, &parent, &self.origin).await {
                stats.failures += 1;
                warn!(node = %node.desc(), parent = %parent, error = %e, "Failed to pull node");
                continue;
            }
            stats.nodes_pulled += 1;
            info!(node = %node.desc(), parent = %parent, "Pulled node from remote");
            self.register(&parent, &node.id).await;

            for child in self.remote.get_children(&node.id, &opts).await? {
                stack.push((child, node.id.clone(), depth + 1));
            }
        }
        Ok(())
    }

    /// React to a new edge seen on either side.
    ///
    /// Edges under the remote root are the local root's own placement on
    /// the remote and are never synced.
    pub async fn handle_new_edge(&mut self, parent: &str, id: &str) -> Result<SyncStats, SyncError> {
        let remote_root = self.remote_root_id().await?;
        if parent == remote_root || id == self.root_local.id {
            return Ok(SyncStats::default());
        }
        debug!(node = %id, parent = %parent, "New edge, syncing node");
        let stats = self.sync_node(parent, id).await?;
        self.subscribe_tree(parent, id).await?;
        Ok(stats)
    }

    /// Register `id` and every local node below it.
    pub async fn subscribe_tree(&mut self, parent: &str, id: &str) -> Result<(), SyncError> {
        let opts = GetNodesOptions::including_deleted();
        let mut stack = vec![(parent.to_string(), id.to_string(), 0usize)];
        while let Some((parent, id, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(SyncError::DepthExceeded {
                    node: id,
                    limit: MAX_TREE_DEPTH,
                });
            }
            self.register(&parent, &id).await;
            for child in self.local.get_children(&id, &opts).await? {
                stack.push((id.clone(), child.id, depth + 1));
            }
        }
        Ok(())
    }

    async fn register(&mut self, parent: &str, id: &str) {
        self.forwarders.registered.insert(id.to_string());
        self.forwarders.forward(subject::node_points(id)).await;
        if id != self.root_local.id && parent != ROOT_PARENT {
            self.forwarders.forward(subject::edge_points(id, parent)).await;
        }
    }

    /// Drop every remote subscription.
    pub async fn shutdown(&mut self) {
        self.forwarders.shutdown().await;
    }
}

fn first(nodes: Vec<NodeEdge>) -> Option<NodeEdge> {
    nodes.into_iter().next()
}
