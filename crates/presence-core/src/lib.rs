//! # callwatch-presence-core
//!
//! Agent presence for the call-center floor.
//!
//! - [`store::PresenceStore`]: the in-memory presence registry (no I/O)
//! - [`transitions`]: the status adjacency table every change is checked against
//! - [`heartbeat::HeartbeatMonitor`]: one cancellable liveness timer per agent
//! - [`service::AgentPresenceService`]: the public façade that mutates the
//!   store, drives the heartbeat timers and emits [`events::PresenceEvent`]s
//!
//! All mutations of one service run to completion under a single lock, so
//! concurrent callers observe them in some sequential order. Events are
//! emitted after the lock is released.

pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod service;
pub mod store;
pub mod transitions;
pub mod types;

pub use config::{HeartbeatConfig, PresenceConfig};
pub use error::{PresenceError, Result};
pub use events::PresenceEvent;
pub use heartbeat::{HeartbeatHandler, HeartbeatMonitor};
pub use service::AgentPresenceService;
pub use store::PresenceStore;
pub use types::{
    AgentFilter, AgentMetrics, AgentPresence, HeartbeatAck, PresenceStatus, RegisterAgent,
    StatusChange, StatusChangeExtra, StatusCounts, StatusReason, StatusTimes, TeamSummary,
};
