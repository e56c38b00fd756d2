//! Registry of live calls

use crate::error::{Result, SupervisorError};
use crate::types::{
    CallFlag, CallState, CallUpdate, MonitoredCall, NewCall, TranscriptTurn,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Owns every live [`MonitoredCall`], keyed by call sid
#[derive(Debug)]
pub struct CallMonitorRegistry {
    calls: HashMap<String, MonitoredCall>,
    max_active_calls: usize,
}

impl CallMonitorRegistry {
    pub fn new(max_active_calls: usize) -> Self {
        Self {
            calls: HashMap::new(),
            max_active_calls,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, call_sid: &str) -> Option<&MonitoredCall> {
        self.calls.get(call_sid)
    }

    pub(crate) fn get_mut(&mut self, call_sid: &str) -> Result<&mut MonitoredCall> {
        self.calls
            .get_mut(call_sid)
            .ok_or_else(|| SupervisorError::CallNotFound(call_sid.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitoredCall> {
        self.calls.values()
    }

    /// Start tracking a call.
    ///
    /// Returns `Ok(None)` when the call sid is already tracked, so a retried
    /// registration changes nothing. Fails with `CapacityExceeded` at the cap.
    pub fn register(&mut self, call: NewCall, now: DateTime<Utc>) -> Result<Option<MonitoredCall>> {
        if self.calls.contains_key(&call.call_sid) {
            return Ok(None);
        }
        if self.calls.len() >= self.max_active_calls {
            return Err(SupervisorError::CapacityExceeded {
                resource: "active call",
                limit: self.max_active_calls,
            });
        }

        let monitored = MonitoredCall {
            call_sid: call.call_sid.clone(),
            lead_id: call.lead_id,
            tenant_id: call.tenant_id,
            direction: call.direction,
            state: call.state,
            customer_phone: call.customer_phone,
            assistant_id: call.assistant_id,
            agent_id: call.agent_id,
            sentiment: None,
            transcript: VecDeque::new(),
            flags: BTreeSet::new(),
            supervisor_sessions: BTreeSet::new(),
            started_at: now,
            updated_at: now,
        };
        self.calls.insert(call.call_sid, monitored.clone());
        Ok(Some(monitored))
    }

    /// Apply a partial update; a `completed` state is left to the caller
    pub fn update(
        &mut self,
        call_sid: &str,
        update: CallUpdate,
        now: DateTime<Utc>,
    ) -> Result<MonitoredCall> {
        let call = self.get_mut(call_sid)?;
        if let Some(state) = update.state {
            call.state = state;
        }
        if update.agent_id.is_some() {
            call.agent_id = update.agent_id;
        }
        if update.assistant_id.is_some() {
            call.assistant_id = update.assistant_id;
        }
        if update.customer_phone.is_some() {
            call.customer_phone = update.customer_phone;
        }
        if update.lead_id.is_some() {
            call.lead_id = update.lead_id;
        }
        for flag in update.add_flags {
            call.flags.insert(flag);
        }
        for flag in &update.remove_flags {
            call.flags.remove(flag);
        }
        call.updated_at = now;
        Ok(call.clone())
    }

    /// Stop tracking a call, returning its final state
    pub fn remove(&mut self, call_sid: &str, now: DateTime<Utc>) -> Option<MonitoredCall> {
        let mut call = self.calls.remove(call_sid)?;
        call.state = CallState::Completed;
        call.updated_at = now;
        Some(call)
    }

    pub fn append_turn(&mut self, call_sid: &str, turn: TranscriptTurn) -> Result<&MonitoredCall> {
        let call = self.get_mut(call_sid)?;
        call.updated_at = turn.at;
        call.push_turn(turn);
        Ok(call)
    }

    /// Set a flag. Returns true if it was not set before.
    pub fn set_flag(&mut self, call_sid: &str, flag: CallFlag) -> Result<bool> {
        Ok(self.get_mut(call_sid)?.flags.insert(flag))
    }

    /// Clear a flag. Returns true if it was set.
    pub fn clear_flag(&mut self, call_sid: &str, flag: CallFlag) -> Result<bool> {
        Ok(self.get_mut(call_sid)?.flags.remove(&flag))
    }

    pub fn attach_session(&mut self, call_sid: &str, session_id: &str) -> Result<()> {
        self.get_mut(call_sid)?
            .supervisor_sessions
            .insert(session_id.to_string());
        Ok(())
    }

    pub fn detach_session(&mut self, call_sid: &str, session_id: &str) {
        if let Some(call) = self.calls.get_mut(call_sid) {
            call.supervisor_sessions.remove(session_id);
        }
    }

    pub fn with_flag(&self, flag: CallFlag) -> Vec<MonitoredCall> {
        let mut calls: Vec<_> = self
            .calls
            .values()
            .filter(|c| c.has_flag(flag))
            .cloned()
            .collect();
        calls.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        calls
    }

    /// Live calls, oldest first
    pub fn snapshot(&self) -> Vec<MonitoredCall> {
        let mut calls: Vec<_> = self.calls.values().cloned().collect();
        calls.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.call_sid.cmp(&b.call_sid))
        });
        calls
    }

    pub fn clear(&mut self) -> Vec<MonitoredCall> {
        self.calls.drain().map(|(_, call)| call).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallDirection;

    #[test]
    fn register_is_idempotent_and_capped() {
        let mut calls = CallMonitorRegistry::new(2);
        let now = Utc::now();
        assert!(calls
            .register(NewCall::new("CA1", CallDirection::Inbound), now)
            .unwrap()
            .is_some());
        assert!(calls
            .register(NewCall::new("CA1", CallDirection::Inbound), now)
            .unwrap()
            .is_none());
        calls
            .register(NewCall::new("CA2", CallDirection::Outbound), now)
            .unwrap();

        let err = calls
            .register(NewCall::new("CA3", CallDirection::Inbound), now)
            .unwrap_err();
        assert_eq!(
            err,
            SupervisorError::CapacityExceeded {
                resource: "active call",
                limit: 2
            }
        );
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn flags_have_set_semantics() {
        let mut calls = CallMonitorRegistry::new(10);
        calls
            .register(NewCall::new("CA1", CallDirection::Inbound), Utc::now())
            .unwrap();
        assert!(calls.set_flag("CA1", CallFlag::HighValueLead).unwrap());
        assert!(!calls.set_flag("CA1", CallFlag::HighValueLead).unwrap());
        assert_eq!(calls.get("CA1").unwrap().flags.len(), 1);
        assert!(calls.clear_flag("CA1", CallFlag::HighValueLead).unwrap());
        assert!(matches!(
            calls.set_flag("nope", CallFlag::HighValueLead),
            Err(SupervisorError::CallNotFound(_))
        ));
    }
}
