//! # callwatch-presence-gateway
//!
//! The message layer in front of the presence service.
//!
//! - [`protocol`]: frame envelope, client/server vocabularies and payloads
//! - [`transport::Transport`]: the port frames are delivered through, with
//!   the in-process [`transport::ChannelTransport`]
//! - [`subscriptions::SubscriptionTable`]: capped channel membership
//! - [`gateway::PresenceGateway`]: request handling, debounced roster
//!   fan-out and supervisor alert relay
//!
//! ```no_run
//! use std::sync::Arc;
//! use callwatch_presence_core::{AgentPresenceService, PresenceConfig};
//! use callwatch_presence_gateway::{ChannelTransport, GatewayConfig, PresenceGateway};
//!
//! # async fn run() {
//! let presence = AgentPresenceService::new(PresenceConfig::default());
//! let transport = Arc::new(ChannelTransport::new());
//! let mut frames = transport.open("conn-1");
//! let gateway = PresenceGateway::new(GatewayConfig::default(), presence, transport.clone());
//!
//! let connect = r#"{"eventType":"presence.connect","eventId":"1","timestamp":0,
//!                  "agentId":"a1","connectionId":"conn-1"}"#;
//! gateway.handle_message("conn-1", connect).ok();
//! let connected = frames.recv().await;
//! # let _ = connected;
//! gateway.destroy();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod protocol;
pub mod subscriptions;
pub mod transport;

pub use config::{GatewayConfig, ALERTS_CHANNEL, ROSTER_CHANNEL};
pub use error::{GatewayError, Result};
pub use events::GatewayEvent;
pub use gateway::PresenceGateway;
pub use protocol::{close_code, ClientMessage, InvalidFrame};
pub use subscriptions::SubscriptionTable;
pub use transport::{ChannelTransport, Transport, TransportMessage};
