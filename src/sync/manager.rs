//! Runs one [`SyncLink`] per `sync` node under the local root.

use crate::bus::ConnectOptions;
use crate::client::{GetNodesOptions, NodeClient};
use crate::error::SyncError;
use crate::point::node_type;
use crate::sync::config::SyncLinkConfig;
use crate::sync::link::{LinkContext, SyncLink};
use crate::types::NodeID;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct SyncManager {
    ctx: LinkContext,
    links: BTreeMap<NodeID, SyncLink>,
}

impl SyncManager {
    pub fn new(ctx: LinkContext) -> Self {
        Self {
            ctx,
            links: BTreeMap::new(),
        }
    }

    /// Start links for new `sync` nodes and stop links whose node is gone
    /// or deleted. Returns the number of running links.
    pub async fn refresh(&mut self) -> Result<usize, SyncError> {
        let bus = self
            .ctx
            .local
            .connect(&ConnectOptions::new(&self.ctx.local_uri).name("sync-manager"))
            .await?;
        let client = NodeClient::new(bus.clone()).with_timeout(self.ctx.defaults.request_timeout());
        let found = async {
            let root = client.get_root().await?;
            let opts = GetNodesOptions {
                typ: Some(node_type::SYNC.to_string()),
                include_deleted: false,
            };
            client.get_children(&root.id, &opts).await
        }
        .await;
        bus.close().await;
        let nodes = found?;

        let wanted: BTreeMap<NodeID, SyncLinkConfig> = nodes
            .iter()
            .map(|n| (n.id.clone(), SyncLinkConfig::from_node(n)))
            .collect();

        let stale: Vec<NodeID> = self
            .links
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(link) = self.links.remove(&id) {
                info!(link = %id, "Sync node removed, stopping link");
                link.stop().await;
            }
        }

        for (id, config) in wanted {
            if self.links.contains_key(&id) {
                continue;
            }
            match SyncLink::start(config, self.ctx.clone()).await {
                Ok(link) => {
                    self.links.insert(id, link);
                }
                Err(e) => warn!(link = %id, error = %e, "Failed to start sync link"),
            }
        }
        Ok(self.links.len())
    }

    pub fn link(&self, id: &str) -> Option<&SyncLink> {
        self.links.get(id)
    }

    pub fn link_ids(&self) -> Vec<NodeID> {
        self.links.keys().cloned().collect()
    }

    pub async fn stop_all(&mut self) {
        let links = std::mem::take(&mut self.links);
        for (_, link) in links {
            link.stop().await;
        }
    }
}
