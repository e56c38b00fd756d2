//! Presence gateway
//!
//! Bridges client connections and the presence service. Inbound frames are
//! decoded and applied to [`AgentPresenceService`]; presence events come
//! back through a synchronous listener and are re-encoded for subscribers.
//!
//! Roster rebroadcasts are debounced with a single timer: the first roster
//! relevant event arms it, later events inside the window are absorbed, and
//! one roster frame goes out `roster_debounce_ms` after the first trigger.
//!
//! The gateway must be driven from inside a tokio runtime.

use crate::config::{GatewayConfig, ALERTS_CHANNEL, ROSTER_CHANNEL};
use crate::error::{GatewayError, Result};
use crate::events::GatewayEvent;
use crate::protocol::{
    self, close_code, ClientMessage, ConnectPayload, ConnectedPayload, DisconnectPayload,
    HeartbeatAckPayload, HeartbeatPayload, QueryPayload, QueryResponsePayload, RosterPayload,
    StatusChangePayload, StatusChangedPayload, SupervisorAlertPayload,
};
use crate::subscriptions::SubscriptionTable;
use crate::transport::Transport;
use callwatch_infra_common::{EventBus, ListenerId, LogContext, NamedEvent, TimerSet};
use callwatch_presence_core::{
    AgentFilter, AgentPresenceService, PresenceEvent, RegisterAgent, StatusChangeExtra,
    StatusReason,
};
use callwatch_supervisor_core::{SupervisorAgent, SupervisorEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Level};

const ROSTER_TIMER: &str = "roster";

struct SupervisorLink {
    agent: Weak<SupervisorAgent>,
    listener: ListenerId,
}

pub struct PresenceGateway {
    config: GatewayConfig,
    presence: Arc<AgentPresenceService>,
    transport: Arc<dyn Transport>,
    subscriptions: SubscriptionTable,
    /// connection id -> agent id
    bindings: DashMap<String, String>,
    presence_listener: Mutex<Option<ListenerId>>,
    supervisor: Mutex<Option<SupervisorLink>>,
    timers: TimerSet<&'static str>,
    events: EventBus<GatewayEvent>,
    destroyed: AtomicBool,
    me: Weak<PresenceGateway>,
}

impl PresenceGateway {
    pub fn new(
        config: GatewayConfig,
        presence: Arc<AgentPresenceService>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<PresenceGateway>| {
            let weak = me.clone();
            let listener = presence.events().on(move |event| {
                if let Some(gateway) = weak.upgrade() {
                    gateway.on_presence_event(event);
                }
            });
            Self {
                subscriptions: SubscriptionTable::new(config.max_subscribers_per_channel),
                events: EventBus::new("gateway", config.event_buffer),
                bindings: DashMap::new(),
                presence_listener: Mutex::new(Some(listener)),
                supervisor: Mutex::new(None),
                timers: TimerSet::new("gateway"),
                destroyed: AtomicBool::new(false),
                me: me.clone(),
                config,
                presence,
                transport,
            }
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus<GatewayEvent> {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Agent bound to a connection
    pub fn bound_agent(&self, connection_id: &str) -> Option<String> {
        self.bindings.get(connection_id).map(|a| a.value().clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Handle one inbound text frame.
    ///
    /// Out-of-protocol frames are reported as an `invalid_message` event and
    /// returned as [`GatewayError::InvalidMessage`]; the connection is left
    /// open either way.
    pub fn handle_message(&self, connection_id: &str, text: &str) -> Result<()> {
        if self.is_destroyed() {
            return Err(GatewayError::Destroyed);
        }

        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(invalid) => {
                warn!(connection_id, reason = %invalid, "invalid client frame");
                self.events.emit(GatewayEvent::InvalidMessage {
                    connection_id: connection_id.to_string(),
                    reason: invalid.to_string(),
                    event_type: invalid.event_type().map(str::to_string),
                });
                return Err(GatewayError::InvalidMessage(invalid.to_string()));
            }
        };

        let event_type = message.event_type();
        let _span = LogContext::with_operation("presence-gateway", event_type)
            .with_field("connection", connection_id)
            .span(Level::DEBUG)
            .entered();
        let result = match message {
            ClientMessage::Connect(payload) => self.on_connect(connection_id, payload),
            ClientMessage::Disconnect(payload) => self.on_disconnect(connection_id, payload),
            ClientMessage::Heartbeat(payload) => self.on_heartbeat(connection_id, payload),
            ClientMessage::StatusChange(payload) => self.on_status_change(connection_id, payload),
            ClientMessage::Query(payload) => self.on_query(connection_id, payload),
        };

        if let Err(e) = &result {
            debug!(connection_id, event_type, error = %e, "request refused");
            self.events.emit(GatewayEvent::RequestFailed {
                connection_id: connection_id.to_string(),
                event_type: event_type.to_string(),
                error: e.to_string(),
            });
        }
        result
    }

    /// The transport reports that a connection went away without a
    /// `presence.disconnect`
    pub fn handle_connection_closed(&self, connection_id: &str) {
        self.subscriptions.remove_connection(connection_id);
        let agent_id = self.bindings.remove(connection_id).map(|(_, agent)| agent);

        if let Some(agent_id) = &agent_id {
            self.retire_if_current(connection_id, agent_id);
        }

        debug!(connection_id, agent_id = ?agent_id, "connection lost");
        self.events.emit(GatewayEvent::ConnectionClosed {
            connection_id: connection_id.to_string(),
            agent_id,
            code: None,
            graceful: false,
        });
    }

    /// Subscribe a connection to a channel. Returns false when the channel
    /// is full and the subscription was dropped.
    pub fn subscribe(&self, connection_id: &str, channel: &str) -> bool {
        self.subscriptions.subscribe(connection_id, channel)
    }

    pub fn unsubscribe(&self, connection_id: &str, channel: &str) -> bool {
        self.subscriptions.unsubscribe(connection_id, channel)
    }

    pub fn channels_of(&self, connection_id: &str) -> Vec<String> {
        self.subscriptions.channels_of(connection_id)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions.subscriber_count(channel)
    }

    /// Encode a payload and send it to every subscriber of a channel
    pub fn publish<T: Serialize>(
        &self,
        channel: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<usize> {
        let recipients = self.subscriptions.subscribers(channel);
        if recipients.is_empty() {
            return Ok(0);
        }
        let frame = protocol::encode(event_type, payload)?;
        Ok(self.transport.send_to_many(&recipients, &frame))
    }

    /// Rebroadcast supervisor alerts as `supervisor.alert` frames on the
    /// alerts channel. Replaces a previously attached supervisor.
    pub fn attach_supervisor(&self, supervisor: &Arc<SupervisorAgent>) {
        self.detach_supervisor();
        let weak = self.me.clone();
        let listener = supervisor.events().on(move |event| {
            if let Some(gateway) = weak.upgrade() {
                gateway.on_supervisor_event(event);
            }
        });
        *self.supervisor.lock() = Some(SupervisorLink {
            agent: Arc::downgrade(supervisor),
            listener,
        });
        debug!("supervisor alerts attached");
    }

    pub fn detach_supervisor(&self) -> bool {
        let Some(link) = self.supervisor.lock().take() else {
            return false;
        };
        if let Some(agent) = link.agent.upgrade() {
            agent.events().off(link.listener);
        }
        true
    }

    /// Send the roster now, cancelling a pending debounced broadcast
    pub fn flush_roster(&self) -> usize {
        self.timers.cancel(&ROSTER_TIMER);
        self.broadcast_roster()
    }

    pub fn is_roster_pending(&self) -> bool {
        self.timers.is_scheduled(&ROSTER_TIMER)
    }

    /// Cancel the debounce timer, detach from the presence service and the
    /// supervisor, and close every open connection with 1001. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.timers.shutdown();
        if let Some(listener) = self.presence_listener.lock().take() {
            self.presence.events().off(listener);
        }
        self.detach_supervisor();

        let bound: Vec<(String, String)> = self
            .bindings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (connection_id, agent_id) in &bound {
            self.retire_if_current(connection_id, agent_id);
        }

        let connections = self.transport.connection_ids();
        for connection_id in &connections {
            self.close(connection_id, close_code::GOING_AWAY, "server shutting down", true);
        }
        self.bindings.clear();
        self.subscriptions.clear();
        self.events.clear();

        info!(connections = connections.len(), "presence gateway destroyed");
    }

    fn on_connect(&self, connection_id: &str, payload: ConnectPayload) -> Result<()> {
        let agent_id = payload.agent_id.clone();

        // The same socket logging in as someone else releases the first agent
        if let Some(previous) = self.bound_agent(connection_id) {
            if previous != agent_id {
                self.bindings.remove(connection_id);
                self.presence.unregister_agent(&previous, StatusReason::Logout);
            }
        }

        let existing = self
            .presence
            .get_agent(&agent_id)
            .and_then(|agent| agent.connection_id);
        if let Some(old_connection) = existing.filter(|c| c != connection_id) {
            info!(agent_id = %agent_id, old_connection = %old_connection, "superseding connection");
            self.close(
                &old_connection,
                close_code::SUPERSEDED,
                "superseded by a new connection",
                true,
            );
        }

        let mut request = RegisterAgent::new(agent_id.clone(), connection_id);
        request.agent_name = payload.agent_name;
        request.requested_status = payload.requested_status;
        request.queue_sids = payload.queue_sids;
        request.skills = payload.skills;
        request.device_id = payload.device_id;
        request.client_type = payload.client_type;
        let agent = self.presence.register_agent(request)?;

        self.bindings
            .insert(connection_id.to_string(), agent_id.clone());
        self.subscriptions.subscribe(connection_id, ROSTER_CHANNEL);
        self.events.emit(GatewayEvent::AgentBound {
            connection_id: connection_id.to_string(),
            agent_id,
        });

        let heartbeat = self.presence.get_heartbeat_config();
        self.send(
            connection_id,
            protocol::CONNECTED,
            &ConnectedPayload {
                agent,
                heartbeat_interval_ms: heartbeat.interval_ms,
                missed_threshold: heartbeat.missed_threshold,
            },
        )
    }

    fn on_disconnect(&self, connection_id: &str, payload: DisconnectPayload) -> Result<()> {
        if !self.is_bound_to(connection_id, &payload.agent_id) {
            debug!(
                connection_id,
                agent_id = %payload.agent_id,
                "disconnect for unbound agent dropped"
            );
            return Ok(());
        }
        self.bindings.remove(connection_id);
        self.presence
            .unregister_agent(&payload.agent_id, StatusReason::Logout);
        Ok(())
    }

    fn on_heartbeat(&self, connection_id: &str, payload: HeartbeatPayload) -> Result<()> {
        if !self.is_bound_to(connection_id, &payload.agent_id) {
            return Ok(());
        }
        let Some(ack) = self.presence.process_heartbeat(
            &payload.agent_id,
            connection_id,
            payload.heartbeat.timestamp,
        ) else {
            return Ok(());
        };
        self.send(
            connection_id,
            protocol::HEARTBEAT_ACK,
            &HeartbeatAckPayload {
                sequence_number: payload.heartbeat.sequence_number,
                ack,
            },
        )
    }

    fn on_status_change(&self, connection_id: &str, payload: StatusChangePayload) -> Result<()> {
        if !self.is_bound_to(connection_id, &payload.agent_id) {
            warn!(
                connection_id,
                agent_id = %payload.agent_id,
                "status change for another agent dropped"
            );
            return Ok(());
        }
        let change = self.presence.change_status(
            &payload.agent_id,
            payload.new_status,
            payload.reason,
            StatusChangeExtra {
                active_call_sid: None,
                status_message: payload.status_message,
            },
        )?;
        self.send(
            connection_id,
            protocol::STATUS_CHANGED,
            &StatusChangedPayload {
                agent_id: payload.agent_id,
                previous_status: change.previous_status,
                new_status: change.status,
                reason: payload.reason,
                changed: change.changed,
            },
        )
    }

    fn on_query(&self, connection_id: &str, payload: QueryPayload) -> Result<()> {
        let filter = AgentFilter {
            statuses: payload.status_filter,
            agent_ids: payload.agent_ids,
            include_offline: payload.include_offline,
            ..Default::default()
        };
        let agents = self.presence.get_agents(&filter);
        self.send(
            connection_id,
            protocol::QUERY_RESPONSE,
            &QueryResponsePayload {
                correlation_id: payload.correlation_id,
                agents,
            },
        )
    }

    fn on_presence_event(&self, event: &PresenceEvent) {
        if self.is_destroyed() {
            return;
        }
        if let PresenceEvent::Timeout {
            agent_id,
            connection_id,
            missed_heartbeats,
            ..
        } = event
        {
            warn!(
                agent_id = %agent_id,
                connection_id = %connection_id,
                missed_heartbeats,
                "closing timed out connection"
            );
            self.close(
                connection_id,
                close_code::HEARTBEAT_TIMEOUT,
                "heartbeat timeout",
                false,
            );
        }
        if event.affects_roster() {
            self.schedule_roster();
        }
    }

    fn on_supervisor_event(&self, event: &SupervisorEvent) {
        if self.is_destroyed() || !event.is_alert() {
            return;
        }
        let details = match serde_json::to_value(event) {
            Ok(details) => details,
            Err(e) => {
                warn!(error = %e, "failed to encode supervisor alert");
                return;
            }
        };
        let payload = SupervisorAlertPayload {
            alert: event.event_name().to_string(),
            call_sid: event.call_sid().map(str::to_string),
            details,
        };
        if let Err(e) = self.publish(ALERTS_CHANNEL, protocol::SUPERVISOR_ALERT, &payload) {
            warn!(error = %e, "failed to publish supervisor alert");
        }
    }

    /// Unregister `agent_id` as lost, unless it already moved to another
    /// connection
    fn retire_if_current(&self, connection_id: &str, agent_id: &str) {
        if self.presence.agent_for_connection(connection_id).as_deref() == Some(agent_id) {
            self.presence
                .unregister_agent(agent_id, StatusReason::ConnectionLost);
        }
    }

    fn schedule_roster(&self) {
        let weak = self.me.clone();
        self.timers
            .schedule_if_idle(ROSTER_TIMER, self.config.roster_debounce(), move || {
                if let Some(gateway) = weak.upgrade() {
                    gateway.broadcast_roster();
                }
            });
    }

    fn broadcast_roster(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let agents = self.presence.get_agents(&AgentFilter {
            include_offline: true,
            ..Default::default()
        });
        let count = agents.len();
        match self.publish(ROSTER_CHANNEL, protocol::ROSTER, &RosterPayload { agents }) {
            Ok(recipients) => {
                debug!(agents = count, recipients, "roster broadcast");
                self.events.emit(GatewayEvent::RosterBroadcast {
                    agents: count,
                    recipients,
                });
                recipients
            }
            Err(e) => {
                warn!(error = %e, "roster broadcast failed");
                0
            }
        }
    }

    fn is_bound_to(&self, connection_id: &str, agent_id: &str) -> bool {
        self.bindings
            .get(connection_id)
            .map(|bound| bound.value() == agent_id)
            .unwrap_or(false)
    }

    fn send<T: Serialize>(&self, connection_id: &str, event_type: &str, payload: &T) -> Result<()> {
        let frame = protocol::encode(event_type, payload)?;
        if !self.transport.send_to(connection_id, &frame) {
            debug!(connection_id, event_type, "reply to closed connection dropped");
        }
        Ok(())
    }

    fn close(&self, connection_id: &str, code: u16, reason: &str, graceful: bool) {
        self.subscriptions.remove_connection(connection_id);
        let agent_id = self.bindings.remove(connection_id).map(|(_, agent)| agent);
        self.transport.close_connection(connection_id, code, reason);
        self.events.emit(GatewayEvent::ConnectionClosed {
            connection_id: connection_id.to_string(),
            agent_id,
            code: Some(code),
            graceful,
        });
    }
}
