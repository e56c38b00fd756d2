//! Process-scoped component context
//!
//! One [`CoreContext`] is built at startup and handed to whatever needs the
//! presence service, the supervisor agent or the SLA engine. It replaces
//! global accessors; tests call [`CoreContext::reset`] to start from a
//! clean floor.

use crate::persistence::spawn_persistence;
use crate::settings::{CallwatchConfig, Result};
use callwatch_infra_common::logging::log_welcome;
use callwatch_presence_core::AgentPresenceService;
use callwatch_presence_gateway::{PresenceGateway, Transport};
use callwatch_sla_core::QueueSlaEngine;
use callwatch_supervisor_core::{SupervisionStore, SupervisorAgent};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

struct Components {
    presence: Arc<AgentPresenceService>,
    supervisor: Arc<SupervisorAgent>,
    sla: Arc<QueueSlaEngine>,
    gateways: Vec<Arc<PresenceGateway>>,
    bridges: Vec<JoinHandle<()>>,
}

impl Components {
    fn build(config: &CallwatchConfig) -> Self {
        let supervisor = SupervisorAgent::new(config.supervisor.clone());
        supervisor.start_session_cleanup();
        Self {
            presence: AgentPresenceService::new(config.presence.clone()),
            supervisor,
            sla: Arc::new(QueueSlaEngine::new(config.sla.clone())),
            gateways: Vec::new(),
            bridges: Vec::new(),
        }
    }

    fn shutdown(&mut self) {
        for gateway in self.gateways.drain(..) {
            gateway.destroy();
        }
        self.supervisor.destroy();
        self.presence.shutdown();
        self.sla.destroy();
        for bridge in self.bridges.drain(..) {
            bridge.abort();
        }
    }
}

pub struct CoreContext {
    config: CallwatchConfig,
    components: Mutex<Components>,
    shut_down: AtomicBool,
}

impl CoreContext {
    /// Build every component from a validated configuration.
    ///
    /// Must be called inside a tokio runtime: the supervisor's idle session
    /// sweep starts immediately.
    pub fn new(config: CallwatchConfig) -> Result<Self> {
        config.validate()?;
        let components = Components::build(&config);
        log_welcome("callwatch", env!("CARGO_PKG_VERSION"));
        info!(
            max_agents = config.presence.max_agents,
            max_active_calls = config.supervisor.max_active_calls,
            sla_queues = config.sla.queues.len(),
            "callwatch core started"
        );
        Ok(Self {
            config,
            components: Mutex::new(components),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Load layered configuration from `path` and the environment, then
    /// build the context
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = CallwatchConfig::load(Some(path.as_ref()))?;
        Ok(Self::new(config)?)
    }

    pub fn config(&self) -> &CallwatchConfig {
        &self.config
    }

    pub fn presence(&self) -> Arc<AgentPresenceService> {
        self.components.lock().presence.clone()
    }

    pub fn supervisor(&self) -> Arc<SupervisorAgent> {
        self.components.lock().supervisor.clone()
    }

    pub fn sla(&self) -> Arc<QueueSlaEngine> {
        self.components.lock().sla.clone()
    }

    /// Build a gateway over `transport`, wired to this context's presence
    /// service and relaying its supervisor alerts. The context destroys it
    /// on shutdown.
    pub fn gateway(&self, transport: Arc<dyn Transport>) -> Arc<PresenceGateway> {
        let mut components = self.components.lock();
        let gateway = PresenceGateway::new(
            self.config.gateway.clone(),
            components.presence.clone(),
            transport,
        );
        gateway.attach_supervisor(&components.supervisor);
        components.gateways.push(gateway.clone());
        gateway
    }

    /// Mirror supervisor events into `store` until shutdown
    pub fn spawn_persistence(&self, store: Arc<dyn SupervisionStore>) {
        let mut components = self.components.lock();
        let bridge = spawn_persistence(&components.supervisor, store);
        components.bridges.push(bridge);
    }

    /// Tear everything down and build fresh components from the same
    /// configuration. Handles obtained earlier keep pointing at the
    /// destroyed components.
    pub fn reset(&self) {
        let mut components = self.components.lock();
        components.shutdown();
        *components = Components::build(&self.config);
        self.shut_down.store(false, Ordering::Release);
        info!("callwatch core reset");
    }

    /// Destroy gateways, end supervisor sessions, cancel heartbeat timers and
    /// stop persistence bridges. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.components.lock().shutdown();
        info!("callwatch core shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for CoreContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
