//! Points: atomic timestamped facts attached to nodes and edges.
//!
//! A point belongs to a series identified by `(typ, key)`. Within a series
//! only the point with the newest `time` survives; merging is strict
//! last-write-wins, so replaying a batch is idempotent and batches touching
//! distinct timestamps commute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Reserved and well-known point types.
pub mod point_type {
    /// Edge scoped. Value 1 marks the edge deleted, 0 live.
    pub const TOMBSTONE: &str = "tombstone";
    /// Sets the node type; never stored as a point.
    pub const NODE_TYPE: &str = "nodeType";
    /// Directive: create or un-tombstone the up-edge from `text`.
    pub const ADD_PARENT: &str = "addParent";
    /// Directive: tombstone the up-edge from `text`.
    pub const REMOVE_PARENT: &str = "removeParent";
    pub const DESCRIPTION: &str = "description";
    pub const VALUE: &str = "value";

    // sync link configuration
    pub const URI: &str = "uri";
    pub const AUTH_TOKEN: &str = "authToken";
    pub const PERIOD: &str = "period";
    pub const DISABLE: &str = "disable";
    pub const SYNC_COUNT: &str = "syncCount";
    pub const SYNC_COUNT_RESET: &str = "syncCountReset";
}

/// Well-known node types.
pub mod node_type {
    pub const UNCLASSIFIED: &str = "unclassified";
    pub const SYNC: &str = "sync";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub key: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub origin: String,
}

impl Point {
    /// Numeric point stamped with the current time.
    pub fn new(typ: impl Into<String>, value: f64) -> Self {
        Self {
            typ: typ.into(),
            key: String::new(),
            time: Utc::now(),
            value,
            text: String::new(),
            origin: String::new(),
        }
    }

    /// Text point stamped with the current time.
    pub fn text(typ: impl Into<String>, text: impl Into<String>) -> Self {
        let mut p = Self::new(typ, 0.0);
        p.text = text.into();
        p
    }

    pub fn tombstone(deleted: bool) -> Self {
        Self::new(point_type::TOMBSTONE, bool_to_f64(deleted))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// True when this point belongs to the `(typ, key)` series.
    pub fn is_match(&self, typ: &str, key: &str) -> bool {
        self.typ == typ && self.key == key
    }

    pub fn same_series(&self, other: &Point) -> bool {
        self.is_match(&other.typ, &other.key)
    }

    pub fn as_bool(&self) -> bool {
        self.value != 0.0
    }

    /// Timestamp in nanoseconds since the Unix epoch, saturating outside the
    /// representable range.
    pub fn time_nanos(&self) -> i64 {
        self.time
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.time.timestamp_micros().saturating_mul(1000))
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T:{} ", self.typ)?;
        if !self.key.is_empty() {
            write!(f, "K:{} ", self.key)?;
        }
        if self.text.is_empty() {
            write!(f, "V:{:.3} ", self.value)?;
        } else {
            write!(f, "V:{} ", self.text)?;
        }
        if !self.origin.is_empty() {
            write!(f, "O:{} ", self.origin)?;
        }
        write!(f, "{}", self.time.to_rfc3339())
    }
}

pub fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// An unordered bag of points, unique per `(typ, key)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(Vec<Point>);

impl Points {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn find(&self, typ: &str, key: &str) -> Option<&Point> {
        self.0.iter().find(|p| p.is_match(typ, key))
    }

    pub fn value(&self, typ: &str, key: &str) -> Option<f64> {
        self.find(typ, key).map(|p| p.value)
    }

    pub fn text(&self, typ: &str, key: &str) -> Option<&str> {
        self.find(typ, key).map(|p| p.text.as_str())
    }

    pub fn bool_value(&self, typ: &str, key: &str) -> Option<bool> {
        self.find(typ, key).map(Point::as_bool)
    }

    /// Merge one point with strict last-write-wins. Returns true when the
    /// bag changed.
    pub fn merge(&mut self, incoming: Point) -> bool {
        match self.0.iter_mut().find(|p| p.same_series(&incoming)) {
            Some(existing) => {
                if incoming.time > existing.time {
                    *existing = incoming;
                    true
                } else {
                    false
                }
            }
            None => {
                self.0.push(incoming);
                true
            }
        }
    }

    /// Merge a batch, returning how many points were applied.
    pub fn merge_all<I: IntoIterator<Item = Point>>(&mut self, incoming: I) -> usize {
        incoming
            .into_iter()
            .map(|p| self.merge(p))
            .filter(|changed| *changed)
            .count()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.bool_value(point_type::TOMBSTONE, "").unwrap_or(false)
    }

    /// Order by `(typ, key)` so storage and hashing are deterministic.
    pub fn sort(&mut self) {
        self.0
            .sort_by(|a, b| (a.typ.as_str(), a.key.as_str()).cmp(&(b.typ.as_str(), b.key.as_str())));
    }

    /// Description text, if one was set.
    pub fn desc(&self) -> Option<&str> {
        self.text(point_type::DESCRIPTION, "").filter(|s| !s.is_empty())
    }

    pub fn into_inner(self) -> Vec<Point> {
        self.0
    }
}

impl From<Vec<Point>> for Points {
    fn from(value: Vec<Point>) -> Self {
        Self(value)
    }
}

impl FromIterator<Point> for Points {
    fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Deref for Points {
    type Target = Vec<Point>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Points {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl IntoIterator for Points {
    type Item = Point;
    type IntoIter = std::vec::IntoIter<Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Points {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
