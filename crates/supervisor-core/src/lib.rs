//! # callwatch-supervisor-core
//!
//! Live call supervision: which calls are in flight, which supervisors are
//! logged in and what they are doing on those calls.
//!
//! - [`calls::CallMonitorRegistry`] owns live calls with their bounded
//!   transcripts and flags
//! - [`sessions::SupervisorSessionRegistry`] owns supervisor sessions and
//!   their monitoring linkage
//! - [`permissions`] is the role to monitoring-mode table
//! - [`agent::SupervisorAgent`] combines both registries with notes,
//!   handoffs, escalation detection and dashboard figures
//! - [`storage`] is the durable storage port and an in-memory implementation

pub mod agent;
pub mod calls;
pub mod config;
pub mod error;
pub mod events;
pub mod permissions;
pub mod sessions;
pub mod storage;
pub mod types;

pub use agent::SupervisorAgent;
pub use calls::CallMonitorRegistry;
pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use events::{LeaveReason, SupervisorEvent};
pub use sessions::SupervisorSessionRegistry;
pub use storage::{InMemoryStore, StorageError, StorageResult, SupervisionStore};
pub use types::{
    CallDirection, CallFlag, CallState, CallUpdate, DashboardStats, EscalationRecord,
    HandoffPriority, HandoffRequest, MonitoredCall, MonitoringMode, NewCall, Speaker,
    SupervisorNote, SupervisorRole, SupervisorSession, TranscriptTurn, TRANSCRIPT_CAPACITY,
};
