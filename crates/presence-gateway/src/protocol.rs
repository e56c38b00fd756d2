//! Presence wire protocol
//!
//! Every frame is a JSON object carrying `eventType`, `eventId` and
//! `timestamp` (epoch milliseconds) next to its payload fields. Inbound
//! frames are decoded in two steps: the envelope is checked against the
//! client vocabulary first, then the payload is deserialized for that
//! event type.

use crate::error::{GatewayError, Result};
use callwatch_presence_core::{AgentPresence, HeartbeatAck, PresenceStatus, StatusReason};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const CONNECT: &str = "presence.connect";
pub const DISCONNECT: &str = "presence.disconnect";
pub const HEARTBEAT: &str = "presence.heartbeat";
pub const STATUS_CHANGE: &str = "presence.status_change";
pub const QUERY: &str = "presence.query";

pub const CONNECTED: &str = "presence.connected";
pub const HEARTBEAT_ACK: &str = "presence.heartbeat_ack";
pub const ROSTER: &str = "presence.roster";
pub const STATUS_CHANGED: &str = "presence.status_changed";
pub const QUERY_RESPONSE: &str = "presence.query_response";
pub const SUPERVISOR_ALERT: &str = "supervisor.alert";

/// Event types only the server may send
pub const SERVER_EVENT_TYPES: [&str; 6] = [
    CONNECTED,
    HEARTBEAT_ACK,
    ROSTER,
    STATUS_CHANGED,
    QUERY_RESPONSE,
    SUPERVISOR_ALERT,
];

/// Close codes used by the gateway
pub mod close_code {
    pub const GOING_AWAY: u16 = 1001;
    pub const SUPERSEDED: u16 = 4001;
    pub const HEARTBEAT_TIMEOUT: u16 = 4002;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub agent_id: String,
    pub agent_name: Option<String>,
    /// Client-side connection label; the transport's id is authoritative
    pub connection_id: String,
    pub device_id: Option<String>,
    pub client_type: Option<String>,
    pub requested_status: Option<PresenceStatus>,
    #[serde(default)]
    pub queue_sids: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    pub agent_id: String,
    pub sequence_number: u64,
    /// Client clock, epoch milliseconds
    pub timestamp: i64,
    pub metrics: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub agent_id: String,
    pub heartbeat: HeartbeatBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangePayload {
    pub agent_id: String,
    pub previous_status: PresenceStatus,
    pub new_status: PresenceStatus,
    pub reason: StatusReason,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub correlation_id: Option<String>,
    pub status_filter: Option<Vec<PresenceStatus>>,
    pub agent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub include_offline: bool,
}

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Connect(ConnectPayload),
    Disconnect(DisconnectPayload),
    Heartbeat(HeartbeatPayload),
    StatusChange(StatusChangePayload),
    Query(QueryPayload),
}

impl ClientMessage {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientMessage::Connect(_) => CONNECT,
            ClientMessage::Disconnect(_) => DISCONNECT,
            ClientMessage::Heartbeat(_) => HEARTBEAT,
            ClientMessage::StatusChange(_) => STATUS_CHANGE,
            ClientMessage::Query(_) => QUERY,
        }
    }
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidFrame {
    /// Not a JSON object
    Malformed(String),
    /// A mandatory envelope field is missing or has the wrong type
    MissingField(&'static str),
    /// A server-to-client event type sent by a client
    ServerEventType(String),
    UnknownEventType(String),
    /// The payload does not match the event type's schema
    Schema { event_type: String, error: String },
}

impl InvalidFrame {
    pub fn event_type(&self) -> Option<&str> {
        match self {
            InvalidFrame::ServerEventType(t) | InvalidFrame::UnknownEventType(t) => {
                Some(t.as_str())
            }
            InvalidFrame::Schema { event_type, .. } => Some(event_type.as_str()),
            InvalidFrame::Malformed(_) | InvalidFrame::MissingField(_) => None,
        }
    }
}

impl fmt::Display for InvalidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidFrame::Malformed(e) => write!(f, "malformed frame: {}", e),
            InvalidFrame::MissingField(field) => write!(f, "missing envelope field {}", field),
            InvalidFrame::ServerEventType(t) => write!(f, "{} is a server event type", t),
            InvalidFrame::UnknownEventType(t) => write!(f, "unknown event type {}", t),
            InvalidFrame::Schema { event_type, error } => {
                write!(f, "invalid {} payload: {}", event_type, error)
            }
        }
    }
}

fn payload<T: DeserializeOwned>(
    event_type: &str,
    value: Value,
) -> std::result::Result<T, InvalidFrame> {
    serde_json::from_value(value).map_err(|e| InvalidFrame::Schema {
        event_type: event_type.to_string(),
        error: e.to_string(),
    })
}

/// Decode one inbound frame
pub fn decode(text: &str) -> std::result::Result<ClientMessage, InvalidFrame> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| InvalidFrame::Malformed(e.to_string()))?;
    let envelope = value
        .as_object()
        .ok_or_else(|| InvalidFrame::Malformed("frame is not an object".into()))?;

    let event_type = envelope
        .get("eventType")
        .and_then(Value::as_str)
        .ok_or(InvalidFrame::MissingField("eventType"))?
        .to_string();
    if !envelope.get("eventId").map(Value::is_string).unwrap_or(false) {
        return Err(InvalidFrame::MissingField("eventId"));
    }
    if !envelope.get("timestamp").map(Value::is_number).unwrap_or(false) {
        return Err(InvalidFrame::MissingField("timestamp"));
    }

    match event_type.as_str() {
        CONNECT => payload(&event_type, value).map(ClientMessage::Connect),
        DISCONNECT => payload(&event_type, value).map(ClientMessage::Disconnect),
        HEARTBEAT => payload(&event_type, value).map(ClientMessage::Heartbeat),
        STATUS_CHANGE => payload(&event_type, value).map(ClientMessage::StatusChange),
        QUERY => payload(&event_type, value).map(ClientMessage::Query),
        t if SERVER_EVENT_TYPES.contains(&t) => Err(InvalidFrame::ServerEventType(event_type)),
        _ => Err(InvalidFrame::UnknownEventType(event_type)),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a, T> {
    event_type: &'a str,
    event_id: String,
    timestamp: i64,
    #[serde(flatten)]
    payload: &'a T,
}

/// Encode an outbound frame with a fresh envelope
pub fn encode<T: Serialize>(event_type: &str, payload: &T) -> Result<String> {
    serde_json::to_string(&Envelope {
        event_type,
        event_id: Uuid::new_v4().to_string(),
        timestamp: Utc::now().timestamp_millis(),
        payload,
    })
    .map_err(|e| GatewayError::Encode(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub agent: AgentPresence,
    pub heartbeat_interval_ms: u64,
    pub missed_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAckPayload {
    pub sequence_number: u64,
    #[serde(flatten)]
    pub ack: HeartbeatAck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPayload {
    pub agents: Vec<AgentPresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedPayload {
    pub agent_id: String,
    pub previous_status: PresenceStatus,
    pub new_status: PresenceStatus,
    pub reason: StatusReason,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponsePayload {
    pub correlation_id: Option<String>,
    pub agents: Vec<AgentPresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorAlertPayload {
    /// Supervisor event name, e.g. `alert:escalation`
    pub alert: String,
    pub call_sid: Option<String>,
    pub details: Value,
}
