//! # hs-protocol
//!
//! Wire types shared between the hookscope relay and its listeners.
//!
//! Listener traffic is one JSON object per WebSocket text frame, shaped as
//! `{"event": "<name>", "data": <payload>}`. `data` is left out for events
//! that carry nothing (`ping`, `pong`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path of the listener WebSocket endpoint.
pub const LISTEN_PATH: &str = "/ws/listen";

/// Default interval between heartbeat checks, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Default inactivity window after which a listener is dropped, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Maximum accepted webhook payload (10 MB).
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// ─── Webhook events ──────────────────────────────────────────

/// A header or query value: a single string, or every value when the name repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    /// Append another value under the same name.
    pub fn push(&mut self, value: String) {
        match self {
            Self::One(first) => {
                let first = std::mem::take(first);
                *self = Self::Many(vec![first, value]);
            }
            Self::Many(values) => values.push(value),
        }
    }
}

/// Name → value(s) mapping used for headers and query parameters.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Insert `value` under `name`, turning the entry into a list on repeats.
pub fn insert_field(map: &mut FieldMap, name: &str, value: String) {
    match map.get_mut(name) {
        Some(existing) => existing.push(value),
        None => {
            map.insert(name.to_string(), FieldValue::One(value));
        }
    }
}

/// Normalized record of one inbound HTTP request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub method: String,
    pub url: String,
    pub headers: FieldMap,
    pub query: FieldMap,
    pub params: BTreeMap<String, String>,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Decoded payload: JSON when the payload parses as JSON, otherwise the raw text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub raw_body: Option<String>,
    #[serde(with = "iso_millis")]
    pub time: DateTime<Utc>,
}

/// Response returned to the webhook sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub session_id: String,
    pub method: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub sockets_notified: usize,
}

// ─── Listener messages ───────────────────────────────────────

/// Commands a listener sends to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinSession(String),
    LeaveSession(String),
    Ping,
}

/// Messages the gateway pushes to a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    SessionJoined(SessionJoined),
    SessionLeft(SessionLeft),
    WebhookEvent(Box<WebhookEvent>),
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoined {
    pub session_id: String,
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLeft {
    pub session_id: String,
}

impl ServerMessage {
    /// Encode as a single text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ClientMessage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
