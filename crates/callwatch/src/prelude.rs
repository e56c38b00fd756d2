//! Common imports for embedding the supervision core

pub use std::sync::Arc;

pub use crate::context::CoreContext;
pub use crate::settings::{CallwatchConfig, ConfigError, LoggingSettings};

pub use callwatch_infra_common::{setup_logging, EventBus, LoggingConfig, NamedEvent};

pub use callwatch_presence_core::{
    AgentFilter, AgentPresence, AgentPresenceService, PresenceConfig, PresenceError,
    PresenceEvent, PresenceStatus, RegisterAgent, StatusChangeExtra, StatusReason,
};

pub use callwatch_supervisor_core::{
    CallDirection, CallFlag, CallState, CallUpdate, HandoffPriority, InMemoryStore,
    MonitoringMode, NewCall, Speaker, SupervisionStore, SupervisorAgent, SupervisorConfig,
    SupervisorError, SupervisorEvent, SupervisorRole,
};

pub use callwatch_sla_core::{
    PeriodType, QueueSlaEngine, QueueSnapshot, SlaConfig, SlaEngineConfig, SlaEvent, SlaOutcome,
};

pub use callwatch_presence_gateway::{
    ChannelTransport, GatewayConfig, GatewayError, PresenceGateway, Transport, TransportMessage,
};
