//! Sync link configuration.
//!
//! A link is configured by the points of a `sync` node, delivered through the
//! same merge path as any other data. Process-wide defaults come from the
//! application config.

use crate::node::NodeEdge;
use crate::point::{bool_to_f64, node_type, point_type, Point, Points};
use crate::types::NodeID;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults shared by every sync link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDefaults {
    /// Period used when a link's `period` point is missing or below 1.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Delay before retrying a failed connect.
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,

    /// Delay before the first connect attempt after start or a config change.
    #[serde(default = "default_initial_connect_delay_ms")]
    pub initial_connect_delay_ms: u64,

    /// Bound on every request made during sync.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra attempts for point pushes and pulls that time out.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Capacity of each link's event mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_period_secs() -> u64 {
    20
}

fn default_connect_retry_ms() -> u64 {
    30_000
}

fn default_initial_connect_delay_ms() -> u64 {
    10
}

fn default_request_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> usize {
    3
}

fn default_mailbox_capacity() -> usize {
    64
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            connect_retry_ms: default_connect_retry_ms(),
            initial_connect_delay_ms: default_initial_connect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl SyncDefaults {
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn initial_connect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_connect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// One link's settings, decoded from its `sync` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncLinkConfig {
    pub id: NodeID,
    pub parent: NodeID,
    pub description: String,
    pub uri: String,
    pub auth_token: String,
    /// Seconds between full passes.
    pub period: i64,
    pub disable: bool,
    pub sync_count: i64,
    pub sync_count_reset: bool,
    /// Latest config point per series; stale updates are dropped against it.
    points: Points,
}

/// What a config update requires of the running link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub reconnect: bool,
    pub period: bool,
}

impl SyncLinkConfig {
    pub fn new(id: impl Into<NodeID>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn from_node(node: &NodeEdge) -> Self {
        let mut config = Self {
            id: node.id.clone(),
            parent: node.parent.clone(),
            ..Default::default()
        };
        config.merge_points(node.points.iter());
        config
    }

    /// Apply config points last-write-wins, reporting which running
    /// behavior they affect. Points no newer than the last one seen for their
    /// series are ignored, and a newer point carrying the current value
    /// changes nothing.
    pub fn merge_points<'a, I>(&mut self, points: I) -> ConfigChange
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut change = ConfigChange::default();
        for p in points {
            if !self.points.merge(p.clone()) {
                continue;
            }
            match p.typ.as_str() {
                point_type::DESCRIPTION => self.description = p.text.clone(),
                point_type::URI => {
                    if self.uri != p.text {
                        self.uri = p.text.clone();
                        change.reconnect = true;
                    }
                }
                point_type::AUTH_TOKEN => {
                    if self.auth_token != p.text {
                        self.auth_token = p.text.clone();
                        change.reconnect = true;
                    }
                }
                point_type::DISABLE => {
                    if self.disable != p.as_bool() {
                        self.disable = p.as_bool();
                        change.reconnect = true;
                    }
                }
                point_type::PERIOD => {
                    let period = p.value as i64;
                    if self.period != period {
                        self.period = period;
                        change.period = true;
                    }
                }
                point_type::SYNC_COUNT => self.sync_count = p.value as i64,
                point_type::SYNC_COUNT_RESET => self.sync_count_reset = p.as_bool(),
                _ => {}
            }
        }
        change
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period.max(1) as u64)
    }

    /// Display name for logs.
    pub fn name(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }

    /// Points that create a `sync` node carrying this config.
    pub fn to_points(&self) -> Vec<Point> {
        let mut points = vec![
            Point::text(point_type::NODE_TYPE, node_type::SYNC),
            Point::text(point_type::URI, self.uri.clone()),
            Point::new(point_type::PERIOD, self.period as f64),
            Point::new(point_type::DISABLE, bool_to_f64(self.disable)),
        ];
        if !self.description.is_empty() {
            points.push(Point::text(point_type::DESCRIPTION, self.description.clone()));
        }
        if !self.auth_token.is_empty() {
            points.push(Point::text(point_type::AUTH_TOKEN, self.auth_token.clone()));
        }
        points
    }
}
