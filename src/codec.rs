//! JSON payload codec for bus messages.
//!
//! Points on the wire carry an optional `time`: an absent time is stamped
//! with the current time at decode, which is different from an explicit
//! Unix-epoch time.

use crate::error::CodecError;
use crate::node::NodeEdge;
use crate::point::{Point, Points};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePoint {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    origin: String,
}

impl From<&Point> for WirePoint {
    fn from(p: &Point) -> Self {
        Self {
            typ: p.typ.clone(),
            key: p.key.clone(),
            time: Some(p.time),
            value: p.value,
            text: p.text.clone(),
            origin: p.origin.clone(),
        }
    }
}

impl WirePoint {
    fn into_point(self, now: DateTime<Utc>) -> Point {
        Point {
            typ: self.typ,
            key: self.key,
            time: self.time.unwrap_or(now),
            value: self.value,
            text: self.text,
            origin: self.origin,
        }
    }
}

pub fn encode_points(points: &[Point]) -> Result<Vec<u8>, CodecError> {
    let wire: Vec<WirePoint> = points.iter().map(WirePoint::from).collect();
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode_points(payload: &[u8]) -> Result<Points, CodecError> {
    let wire: Vec<WirePoint> = serde_json::from_slice(payload)?;
    let now = Utc::now();
    Ok(wire.into_iter().map(|w| w.into_point(now)).collect())
}

/// Body of a `nodes.<parent>.<id>` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesRequest {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub typ: String,
    #[serde(default, rename = "includeDel")]
    pub include_deleted: bool,
}

/// Reply to a `nodes.<parent>.<id>` request. An empty `error` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub nodes: Vec<NodeEdge>,
}

/// Reply to a point batch sent as a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}
