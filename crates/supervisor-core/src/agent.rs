//! Supervisor agent
//!
//! Owns the live-call and supervisor-session registries, notes, handoffs and
//! the day-scoped history behind one lock. Each operation mutates under the
//! lock, collects the events it produced and emits them after unlocking.

use crate::calls::CallMonitorRegistry;
use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::events::{LeaveReason, SupervisorEvent};
use crate::sessions::SupervisorSessionRegistry;
use crate::types::{
    CallFlag, CallState, CallUpdate, DashboardStats, EscalationRecord, HandoffPriority,
    HandoffRequest, MonitoredCall, MonitoringMode, NewCall, Speaker, SupervisorNote,
    SupervisorRole, SupervisorSession, TranscriptTurn,
};
use callwatch_infra_common::{EventBus, LogContext, TimerSet};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

const SESSION_CLEANUP: &str = "session-cleanup";

/// Counters that reset at UTC midnight
#[derive(Debug, Clone)]
struct DayHistory {
    day: NaiveDate,
    calls_started: u32,
    calls_completed: u32,
    escalations: u32,
    handoffs: u32,
}

impl DayHistory {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            calls_started: 0,
            calls_completed: 0,
            escalations: 0,
            handoffs: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if self.day != now.date_naive() {
            *self = Self::new(now);
        }
    }
}

struct SupervisorState {
    calls: CallMonitorRegistry,
    sessions: SupervisorSessionRegistry,
    notes: HashMap<String, Vec<SupervisorNote>>,
    handoffs: HashMap<String, HandoffRequest>,
    today: DayHistory,
}

impl SupervisorState {
    fn new(config: &SupervisorConfig, now: DateTime<Utc>) -> Self {
        Self {
            calls: CallMonitorRegistry::new(config.max_active_calls),
            sessions: SupervisorSessionRegistry::new(config.max_supervisor_sessions),
            notes: HashMap::new(),
            handoffs: HashMap::new(),
            today: DayHistory::new(now),
        }
    }

    /// Remove a call and release every session monitoring it
    fn end_call(
        &mut self,
        call_sid: &str,
        now: DateTime<Utc>,
        events: &mut Vec<SupervisorEvent>,
    ) -> Option<MonitoredCall> {
        let mut call = self.calls.remove(call_sid, now)?;
        for session in self.sessions.release_call(call_sid) {
            events.push(SupervisorEvent::SupervisorLeft {
                session_id: session.session_id,
                supervisor_id: session.supervisor_id,
                call_sid: call_sid.to_string(),
                reason: LeaveReason::CallEnded,
            });
        }
        call.supervisor_sessions.clear();
        self.notes.remove(call_sid);
        self.handoffs.remove(call_sid);
        self.today.calls_completed += 1;
        events.push(SupervisorEvent::CallEnded { call: call.clone() });
        Some(call)
    }

    fn end_session(
        &mut self,
        session_id: &str,
        reason: LeaveReason,
        events: &mut Vec<SupervisorEvent>,
    ) -> bool {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return false;
        };
        if let Some(call_sid) = session.active_call_sid.take() {
            self.calls.detach_session(&call_sid, session_id);
            events.push(SupervisorEvent::SupervisorLeft {
                session_id: session.session_id.clone(),
                supervisor_id: session.supervisor_id.clone(),
                call_sid,
                reason,
            });
        }
        session.monitoring_mode = MonitoringMode::None;
        events.push(SupervisorEvent::SessionEnded { session, reason });
        true
    }
}

pub struct SupervisorAgent {
    config: SupervisorConfig,
    keywords: Vec<String>,
    state: Mutex<SupervisorState>,
    events: EventBus<SupervisorEvent>,
    timers: TimerSet<&'static str>,
    destroyed: AtomicBool,
    me: Weak<SupervisorAgent>,
}

impl SupervisorAgent {
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            keywords: config.normalized_keywords(),
            state: Mutex::new(SupervisorState::new(&config, Utc::now())),
            events: EventBus::new("supervisor", config.event_buffer),
            timers: TimerSet::new("supervisor"),
            destroyed: AtomicBool::new(false),
            config,
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus<SupervisorEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    fn emit_all(&self, events: Vec<SupervisorEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    // ---- call lifecycle -------------------------------------------------

    /// Start tracking a call. Registering a known call sid returns the
    /// existing call unchanged.
    pub fn register_call(&self, call: NewCall) -> Result<MonitoredCall> {
        let now = Utc::now();
        let call_sid = call.call_sid.clone();
        let registered = {
            let mut state = self.state.lock();
            state.today.roll(now);
            match state.calls.register(call, now) {
                Ok(Some(registered)) => {
                    state.today.calls_started += 1;
                    registered
                }
                Ok(None) => {
                    return state
                        .calls
                        .get(&call_sid)
                        .cloned()
                        .ok_or(SupervisorError::CallNotFound(call_sid));
                }
                Err(e) => {
                    warn!(call_sid = %call_sid, error = %e, "rejecting call registration");
                    return Err(e);
                }
            }
        };

        debug!(call_sid = %registered.call_sid, state = %registered.state, "call registered");
        self.events.emit(SupervisorEvent::CallRegistered {
            call: registered.clone(),
        });
        Ok(registered)
    }

    /// Apply a partial update. Moving the call to `completed` ends it.
    pub fn update_call(&self, call_sid: &str, update: CallUpdate) -> Result<MonitoredCall> {
        let now = Utc::now();
        let completes = update.state == Some(CallState::Completed);
        let mut events = Vec::new();
        let call = {
            let mut state = self.state.lock();
            state.today.roll(now);
            let updated = state.calls.update(call_sid, update, now)?;
            if completes {
                state.end_call(call_sid, now, &mut events).unwrap_or(updated)
            } else {
                events.push(SupervisorEvent::CallUpdated {
                    call: updated.clone(),
                });
                updated
            }
        };
        self.emit_all(events);
        Ok(call)
    }

    /// End a call. Every supervisor monitoring it is released and gets one
    /// `supervisor:left`. Returns `None` for unknown calls.
    pub fn end_call(&self, call_sid: &str) -> Option<MonitoredCall> {
        let now = Utc::now();
        let mut events = Vec::new();
        let ended = {
            let mut state = self.state.lock();
            state.today.roll(now);
            state.end_call(call_sid, now, &mut events)
        };
        if ended.is_some() {
            debug!(call_sid, "call ended");
        }
        self.emit_all(events);
        ended
    }

    /// Append a transcript turn and scan it for escalation keywords.
    ///
    /// Returns the matched keyword. The call is flagged and the escalation
    /// alert raised only the first time a keyword matches on a call.
    pub fn process_transcript_message(
        &self,
        call_sid: &str,
        speaker: Speaker,
        text: &str,
    ) -> Result<Option<String>> {
        let now = Utc::now();
        let lowered = text.to_lowercase();
        let keyword = self
            .keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .cloned();

        let escalation = {
            let mut state = self.state.lock();
            state.today.roll(now);
            let turn = TranscriptTurn {
                speaker,
                text: text.to_string(),
                at: now,
            };
            let tenant_id = state.calls.append_turn(call_sid, turn)?.tenant_id.clone();

            let Some(keyword) = &keyword else {
                return Ok(None);
            };
            if state.calls.set_flag(call_sid, CallFlag::EscalationRequested)? {
                state.today.escalations += 1;
                Some(EscalationRecord {
                    escalation_id: Uuid::new_v4().to_string(),
                    call_sid: call_sid.to_string(),
                    tenant_id,
                    keyword: keyword.clone(),
                    text: text.to_string(),
                    detected_at: now,
                })
            } else {
                None
            }
        };

        if let Some(escalation) = escalation {
            info!(call_sid, keyword = %escalation.keyword, "escalation requested");
            self.events
                .emit(SupervisorEvent::EscalationAlert { escalation });
        }
        Ok(keyword)
    }

    /// Record a sentiment score. Returns true when the score crossed into
    /// the negative zone and an alert was raised.
    pub fn update_sentiment(&self, call_sid: &str, sentiment: f64) -> Result<bool> {
        let now = Utc::now();
        let threshold = self.config.negative_sentiment_threshold;
        let crossed = {
            let mut state = self.state.lock();
            let call = state.calls.get_mut(call_sid)?;
            let was_negative = call.sentiment.map(|s| s < threshold).unwrap_or(false);
            let is_negative = sentiment < threshold;
            call.sentiment = Some(sentiment);
            call.updated_at = now;
            if is_negative {
                call.flags.insert(CallFlag::NegativeSentiment);
            } else {
                call.flags.remove(&CallFlag::NegativeSentiment);
            }
            is_negative && !was_negative
        };

        if crossed {
            info!(call_sid, sentiment, threshold, "negative sentiment detected");
            self.events.emit(SupervisorEvent::NegativeSentimentAlert {
                call_sid: call_sid.to_string(),
                sentiment,
                threshold,
                detected_at: now,
            });
        }
        Ok(crossed)
    }

    // ---- supervisor sessions -------------------------------------------

    pub fn create_session(
        &self,
        supervisor_id: &str,
        supervisor_name: &str,
        role: SupervisorRole,
        tenant_id: Option<String>,
    ) -> Result<SupervisorSession> {
        let session = self
            .state
            .lock()
            .sessions
            .create(
                supervisor_id,
                supervisor_name,
                role,
                tenant_id,
                Instant::now(),
                Utc::now(),
            )
            .map_err(|e| {
                warn!(supervisor_id, error = %e, "rejecting supervisor session");
                e
            })?;

        info!(
            session_id = %session.session_id,
            supervisor_id,
            %role,
            "supervisor session created"
        );
        self.events.emit(SupervisorEvent::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    /// End a session. Returns false for unknown sessions.
    pub fn end_session(&self, session_id: &str) -> bool {
        let mut events = Vec::new();
        let ended = self
            .state
            .lock()
            .end_session(session_id, LeaveReason::SessionEnded, &mut events);
        if ended {
            info!(session_id, "supervisor session ended");
        }
        self.emit_all(events);
        ended
    }

    /// Start monitoring a call, leaving any other call the session was on.
    ///
    /// Repeating the current call and mode is a no-op; the same call with
    /// another mode behaves like [`Self::change_monitoring_mode`].
    pub fn start_monitoring(
        &self,
        session_id: &str,
        call_sid: &str,
        mode: MonitoringMode,
    ) -> Result<SupervisorSession> {
        let _span = session_context("start_monitoring", session_id)
            .with_field("call", call_sid)
            .with_field("mode", mode.as_str())
            .span(Level::DEBUG)
            .entered();
        let (now, now_utc) = (Instant::now(), Utc::now());
        let mut events = Vec::new();
        let session = {
            let mut state = self.state.lock();
            let current = state.sessions.authorize(session_id, mode)?.clone();
            if state.calls.get(call_sid).is_none() {
                return Err(SupervisorError::CallNotFound(call_sid.to_string()));
            }

            if current.active_call_sid.as_deref() == Some(call_sid) {
                if current.monitoring_mode == mode {
                    return Ok(current);
                }
                drop(state);
                return self.change_monitoring_mode(session_id, mode);
            }

            if let Some(previous_call) = state.sessions.end_monitoring(session_id, now, now_utc)? {
                state.calls.detach_session(&previous_call, session_id);
                events.push(SupervisorEvent::SupervisorLeft {
                    session_id: session_id.to_string(),
                    supervisor_id: current.supervisor_id.clone(),
                    call_sid: previous_call,
                    reason: LeaveReason::SwitchedCall,
                });
            }

            let session = state
                .sessions
                .begin_monitoring(session_id, call_sid, mode, now, now_utc)?;
            state.calls.attach_session(call_sid, session_id)?;
            events.push(SupervisorEvent::SupervisorJoined {
                session: session.clone(),
                call_sid: call_sid.to_string(),
                mode,
            });
            session
        };

        info!(session_id, call_sid, %mode, "supervisor joined call");
        self.emit_all(events);
        Ok(session)
    }

    /// Change the mode of a session that is monitoring a call
    pub fn change_monitoring_mode(
        &self,
        session_id: &str,
        mode: MonitoringMode,
    ) -> Result<SupervisorSession> {
        let _span = session_context("change_monitoring_mode", session_id)
            .with_field("mode", mode.as_str())
            .span(Level::DEBUG)
            .entered();
        let (previous_mode, session) = {
            let mut state = self.state.lock();
            state.sessions.authorize(session_id, mode)?;
            state
                .sessions
                .change_mode(session_id, mode, Instant::now(), Utc::now())?
        };

        if previous_mode != mode {
            if let Some(call_sid) = session.active_call_sid.clone() {
                debug!(session_id, %previous_mode, %mode, "monitoring mode changed");
                self.events.emit(SupervisorEvent::ModeChanged {
                    session: session.clone(),
                    call_sid,
                    previous_mode,
                    mode,
                });
            }
        }
        Ok(session)
    }

    /// Stop monitoring. Returns false if the session was not on a call.
    pub fn stop_monitoring(&self, session_id: &str) -> Result<bool> {
        let left = {
            let mut state = self.state.lock();
            let supervisor_id = state
                .sessions
                .get(session_id)
                .map(|s| s.supervisor_id.clone())
                .ok_or_else(|| SupervisorError::SessionNotFound(session_id.to_string()))?;
            let call = state
                .sessions
                .end_monitoring(session_id, Instant::now(), Utc::now())?;
            if let Some(call_sid) = &call {
                state.calls.detach_session(call_sid, session_id);
            }
            call.map(|call_sid| SupervisorEvent::SupervisorLeft {
                session_id: session_id.to_string(),
                supervisor_id,
                call_sid,
                reason: LeaveReason::Stopped,
            })
        };

        match left {
            Some(event) => {
                self.events.emit(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---- handoffs -----------------------------------------------------------

    /// Ask for a human to take over a call. A pending request for the same
    /// call is returned as is.
    pub fn request_handoff(
        &self,
        call_sid: &str,
        reason: &str,
        priority: HandoffPriority,
        notes: Option<String>,
    ) -> Result<HandoffRequest> {
        let now = Utc::now();
        let request = {
            let mut state = self.state.lock();
            state.today.roll(now);
            if let Some(existing) = state.handoffs.get(call_sid).filter(|h| h.is_pending()) {
                return Ok(existing.clone());
            }
            state.calls.set_flag(call_sid, CallFlag::AiHandoffNeeded)?;
            let request = HandoffRequest {
                handoff_id: Uuid::new_v4().to_string(),
                call_sid: call_sid.to_string(),
                reason: reason.to_string(),
                priority,
                notes,
                requested_at: now,
                assigned_agent_id: None,
                completed_at: None,
            };
            state.handoffs.insert(call_sid.to_string(), request.clone());
            state.today.handoffs += 1;
            request
        };

        info!(call_sid, ?priority, "handoff requested");
        self.events.emit(SupervisorEvent::HandoffRequested {
            request: request.clone(),
        });
        Ok(request)
    }

    /// Hand a call over to a human agent
    pub fn complete_handoff(&self, call_sid: &str, agent_id: &str) -> Result<HandoffRequest> {
        let now = Utc::now();
        let (request, call) = {
            let mut state = self.state.lock();
            if state.calls.get(call_sid).is_none() {
                return Err(SupervisorError::CallNotFound(call_sid.to_string()));
            }
            let request = state
                .handoffs
                .get_mut(call_sid)
                .filter(|h| h.is_pending())
                .ok_or_else(|| SupervisorError::HandoffNotFound(call_sid.to_string()))?;
            request.assigned_agent_id = Some(agent_id.to_string());
            request.completed_at = Some(now);
            let request = request.clone();

            let call = state.calls.get_mut(call_sid)?;
            call.flags.remove(&CallFlag::AiHandoffNeeded);
            call.agent_id = Some(agent_id.to_string());
            call.updated_at = now;
            (request, call.clone())
        };

        info!(call_sid, agent_id, "handoff completed");
        self.events.emit(SupervisorEvent::HandoffCompleted { request: request.clone() });
        self.events.emit(SupervisorEvent::CallUpdated { call });
        Ok(request)
    }

    pub fn get_handoff(&self, call_sid: &str) -> Option<HandoffRequest> {
        self.state.lock().handoffs.get(call_sid).cloned()
    }

    /// Pending handoffs, most urgent first
    pub fn get_pending_handoffs(&self) -> Vec<HandoffRequest> {
        let mut pending: Vec<_> = self
            .state
            .lock()
            .handoffs
            .values()
            .filter(|h| h.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.requested_at.cmp(&b.requested_at))
        });
        pending
    }

    // ---- notes ------------------------------------------------------------

    pub fn add_note(
        &self,
        call_sid: &str,
        supervisor_id: &str,
        content: &str,
        is_private: bool,
    ) -> Result<SupervisorNote> {
        let note = {
            let mut state = self.state.lock();
            if state.calls.get(call_sid).is_none() {
                return Err(SupervisorError::CallNotFound(call_sid.to_string()));
            }
            let note = SupervisorNote {
                note_id: Uuid::new_v4().to_string(),
                call_sid: call_sid.to_string(),
                supervisor_id: supervisor_id.to_string(),
                content: content.to_string(),
                is_private,
                created_at: Utc::now(),
            };
            state
                .notes
                .entry(call_sid.to_string())
                .or_default()
                .push(note.clone());
            note
        };
        self.events.emit(SupervisorEvent::NoteAdded { note: note.clone() });
        Ok(note)
    }

    /// Public notes plus the requester's own private notes, oldest first
    pub fn get_notes(
        &self,
        call_sid: &str,
        requesting_supervisor_id: Option<&str>,
    ) -> Vec<SupervisorNote> {
        self.state
            .lock()
            .notes
            .get(call_sid)
            .map(|notes| {
                notes
                    .iter()
                    .filter(|n| {
                        !n.is_private || Some(n.supervisor_id.as_str()) == requesting_supervisor_id
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- queries ------------------------------------------------------------

    pub fn get_call(&self, call_sid: &str) -> Option<MonitoredCall> {
        self.state.lock().calls.get(call_sid).cloned()
    }

    pub fn get_active_calls(&self) -> Vec<MonitoredCall> {
        self.state.lock().calls.snapshot()
    }

    pub fn get_calls_by_flag(&self, flag: CallFlag) -> Vec<MonitoredCall> {
        self.state.lock().calls.with_flag(flag)
    }

    pub fn get_session(&self, session_id: &str) -> Option<SupervisorSession> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    pub fn get_active_sessions(&self) -> Vec<SupervisorSession> {
        let mut sessions: Vec<_> = self.state.lock().sessions.iter().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub fn get_dashboard_stats(&self) -> DashboardStats {
        let mut state = self.state.lock();
        state.today.roll(Utc::now());

        let mut stats = DashboardStats {
            active_calls: state.calls.len(),
            active_supervisors: state.sessions.len(),
            monitoring_sessions: state.sessions.iter().filter(|s| s.is_monitoring()).count(),
            calls_today: state.today.calls_started,
            completed_today: state.today.calls_completed,
            escalations_today: state.today.escalations,
            handoffs_today: state.today.handoffs,
            ..Default::default()
        };

        let mut sentiment_sum = 0.0;
        let mut sentiment_count = 0usize;
        for call in state.calls.iter() {
            if call.state == CallState::Ringing {
                stats.calls_in_queue += 1;
            }
            if call.is_ai_handled() {
                stats.ai_handled_calls += 1;
            }
            if !call.flags.is_empty() {
                stats.active_alerts += 1;
            }
            if let Some(sentiment) = call.sentiment {
                sentiment_sum += sentiment;
                sentiment_count += 1;
            }
        }
        if sentiment_count > 0 {
            stats.average_sentiment = Some(sentiment_sum / sentiment_count as f64);
        }
        stats
    }

    // ---- idle session cleanup ----------------------------------------------

    /// Start the periodic idle-session sweep. Calling it again restarts it.
    pub fn start_session_cleanup(&self) {
        let interval = self.config.cleanup_interval();
        let me = self.me.clone();
        self.timers.spawn(SESSION_CLEANUP, move |_token| async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(agent) = me.upgrade() else {
                    return;
                };
                agent.expire_idle_sessions();
            }
        });
    }

    /// End every session idle for longer than the configured timeout
    pub fn expire_idle_sessions(&self) -> usize {
        let mut events = Vec::new();
        let expired = {
            let mut state = self.state.lock();
            let idle = state
                .sessions
                .idle(self.config.session_idle_timeout(), Instant::now());
            for session_id in &idle {
                state.end_session(session_id, LeaveReason::IdleTimeout, &mut events);
            }
            idle.len()
        };
        if expired > 0 {
            info!(expired, "expired idle supervisor sessions");
        }
        self.emit_all(events);
        expired
    }

    // ---- teardown -------------------------------------------------------------

    /// Cancel timers, end every session and drop every call. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timers.shutdown();

        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let session_ids: Vec<String> =
                state.sessions.iter().map(|s| s.session_id.clone()).collect();
            for session_id in &session_ids {
                state.end_session(session_id, LeaveReason::Shutdown, &mut events);
            }
            state.calls.clear();
            state.notes.clear();
            state.handoffs.clear();
        }

        info!("supervisor agent destroyed");
        self.emit_all(events);
        self.events.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

fn session_context(operation: &str, session_id: &str) -> LogContext {
    LogContext::with_operation("supervisor", operation).with_field("session", session_id)
}
