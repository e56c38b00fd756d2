//! Persistence bridge
//!
//! Mirrors supervisor events into a [`SupervisionStore`] from a background
//! task. The in-memory registries never wait on it: a slow or failing store
//! only delays or loses its own copy, and failures are logged, not retried.

use callwatch_infra_common::NamedEvent;
use callwatch_supervisor_core::{
    CallFlag, MonitoredCall, MonitoringMode, StorageError, StorageResult, SupervisionStore,
    SupervisorAgent, SupervisorEvent,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Subscribe to `supervisor` and write its events to `store` until the
/// agent is dropped or the task is aborted
pub fn spawn_persistence(
    supervisor: &SupervisorAgent,
    store: Arc<dyn SupervisionStore>,
) -> JoinHandle<()> {
    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = persist(store.as_ref(), &event).await {
                        warn!(
                            event = event.event_name(),
                            error = %e,
                            "failed to persist supervision event"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "persistence bridge fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("persistence bridge stopped");
    })
}

/// Apply one supervisor event to the store
pub async fn persist(store: &dyn SupervisionStore, event: &SupervisorEvent) -> StorageResult<()> {
    match event {
        SupervisorEvent::CallRegistered { call } => store.save_call(call).await,
        SupervisorEvent::CallUpdated { call } | SupervisorEvent::CallEnded { call } => {
            match store.update_call(call).await {
                Err(StorageError::NotFound(_)) => store.save_call(call).await,
                other => other,
            }
        }
        SupervisorEvent::SessionCreated { session } => store.save_session(session).await,
        SupervisorEvent::SessionEnded { session, .. } => {
            store.delete_session(&session.session_id).await.map(|_| ())
        }
        SupervisorEvent::SupervisorJoined { session, .. }
        | SupervisorEvent::ModeChanged { session, .. } => store.update_session(session).await,
        SupervisorEvent::SupervisorLeft { session_id, .. } => {
            let Some(mut session) = store.get_session(session_id).await? else {
                return Ok(());
            };
            session.monitoring_mode = MonitoringMode::None;
            session.active_call_sid = None;
            store.update_session(&session).await
        }
        SupervisorEvent::HandoffRequested { request } => {
            store.record_handoff(request).await?;
            update_stored_call(store, &request.call_sid, |call| {
                call.flags.insert(CallFlag::AiHandoffNeeded);
            })
            .await
        }
        SupervisorEvent::HandoffCompleted { request } => store.complete_handoff(request).await,
        SupervisorEvent::EscalationAlert { escalation } => {
            store.record_escalation(escalation).await?;
            update_stored_call(store, &escalation.call_sid, |call| {
                call.flags.insert(CallFlag::EscalationRequested);
            })
            .await
        }
        SupervisorEvent::NoteAdded { note } => store.save_note(note).await,
        SupervisorEvent::NegativeSentimentAlert {
            call_sid, sentiment, ..
        } => {
            update_stored_call(store, call_sid, |call| {
                call.sentiment = Some(*sentiment);
                call.flags.insert(CallFlag::NegativeSentiment);
            })
            .await
        }
    }
}

/// Alerts carry no call snapshot; patch the stored copy if there is one
async fn update_stored_call<F>(
    store: &dyn SupervisionStore,
    call_sid: &str,
    apply: F,
) -> StorageResult<()>
where
    F: FnOnce(&mut MonitoredCall) + Send,
{
    let Some(mut call) = store.get_call(call_sid).await? else {
        return Ok(());
    };
    apply(&mut call);
    store.update_call(&call).await
}
