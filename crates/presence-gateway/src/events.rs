//! Local gateway events

use callwatch_infra_common::NamedEvent;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A client frame was rejected; the connection stays open
    InvalidMessage {
        connection_id: String,
        reason: String,
        event_type: Option<String>,
    },

    /// A connection was bound to an agent by `presence.connect`
    AgentBound {
        connection_id: String,
        agent_id: String,
    },

    ConnectionClosed {
        connection_id: String,
        agent_id: Option<String>,
        /// Close code sent by the gateway, `None` when the peer went away
        code: Option<u16>,
        graceful: bool,
    },

    RosterBroadcast { agents: usize, recipients: usize },

    /// A well-formed request was refused by the presence service
    RequestFailed {
        connection_id: String,
        event_type: String,
        error: String,
    },
}

impl NamedEvent for GatewayEvent {
    fn event_name(&self) -> &'static str {
        match self {
            GatewayEvent::InvalidMessage { .. } => "invalid_message",
            GatewayEvent::AgentBound { .. } => "agent_bound",
            GatewayEvent::ConnectionClosed { .. } => "connection_closed",
            GatewayEvent::RosterBroadcast { .. } => "roster_broadcast",
            GatewayEvent::RequestFailed { .. } => "request_failed",
        }
    }
}
