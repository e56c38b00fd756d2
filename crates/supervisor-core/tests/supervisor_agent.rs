use callwatch_infra_common::NamedEvent;
use callwatch_supervisor_core::{
    CallDirection, CallFlag, CallState, CallUpdate, HandoffPriority, LeaveReason,
    MonitoringMode, NewCall, Speaker, SupervisorAgent, SupervisorConfig, SupervisorError,
    SupervisorEvent, SupervisorRole,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn agent() -> Arc<SupervisorAgent> {
    SupervisorAgent::new(SupervisorConfig::default())
}

fn record(agent: &SupervisorAgent) -> Arc<Mutex<Vec<SupervisorEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    agent.events().on(move |e| sink.lock().push(e.clone()));
    seen
}

fn live_call(agent: &SupervisorAgent, call_sid: &str) {
    agent
        .register_call(
            NewCall::new(call_sid, CallDirection::Inbound).with_state(CallState::InProgress),
        )
        .unwrap();
}

#[tokio::test]
async fn barge_depends_on_role() {
    let agent = agent();
    live_call(&agent, "CA1");

    for (role, allowed) in [
        (SupervisorRole::Supervisor, false),
        (SupervisorRole::Manager, true),
        (SupervisorRole::Admin, true),
    ] {
        let session = agent.create_session("sup", "Sam", role, None).unwrap();
        let result = agent.start_monitoring(&session.session_id, "CA1", MonitoringMode::Barge);
        if allowed {
            let session = result.unwrap();
            assert_eq!(session.monitoring_mode, MonitoringMode::Barge);
            assert_eq!(session.interventions, 1);
        } else {
            assert_eq!(
                result.unwrap_err(),
                SupervisorError::InsufficientPermissions {
                    role,
                    mode: MonitoringMode::Barge
                }
            );
            assert!(!agent.get_session(&session.session_id).unwrap().is_monitoring());
        }
    }
}

#[tokio::test]
async fn start_monitoring_rejects_unknown_targets() {
    let agent = agent();
    let session = agent
        .create_session("sup", "Sam", SupervisorRole::Admin, None)
        .unwrap();
    assert_eq!(
        agent
            .start_monitoring(&session.session_id, "missing", MonitoringMode::Listen)
            .unwrap_err(),
        SupervisorError::CallNotFound("missing".into())
    );
    live_call(&agent, "CA1");
    assert!(matches!(
        agent.start_monitoring("missing", "CA1", MonitoringMode::Listen),
        Err(SupervisorError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn ending_a_monitored_call_releases_the_supervisor_once() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");
    let session = agent
        .create_session("sup", "Sam", SupervisorRole::Manager, None)
        .unwrap();
    agent
        .start_monitoring(&session.session_id, "CA1", MonitoringMode::Listen)
        .unwrap();
    assert!(agent
        .get_call("CA1")
        .unwrap()
        .supervisor_sessions
        .contains(&session.session_id));

    assert!(agent.end_call("CA1").is_some());
    assert!(agent.end_call("CA1").is_none());

    let left: Vec<_> = seen
        .lock()
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::SupervisorLeft { session_id, reason, .. } => {
                Some((session_id.clone(), *reason))
            }
            _ => None,
        })
        .collect();
    assert_eq!(left, vec![(session.session_id.clone(), LeaveReason::CallEnded)]);

    let after = agent.get_session(&session.session_id).unwrap();
    assert_eq!(after.monitoring_mode, MonitoringMode::None);
    assert!(after.active_call_sid.is_none());
    assert_eq!(agent.stop_monitoring(&session.session_id), Ok(false));
}

#[tokio::test]
async fn completed_update_ends_the_call() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");

    let call = agent
        .update_call(
            "CA1",
            CallUpdate {
                state: Some(CallState::Completed),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(call.state, CallState::Completed);
    assert!(agent.get_call("CA1").is_none());
    assert_eq!(seen.lock().last().unwrap().event_name(), "call:ended");
    assert_eq!(agent.get_dashboard_stats().completed_today, 1);
}

#[tokio::test]
async fn mode_changes_count_interventions() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");
    let session = agent
        .create_session("sup", "Sam", SupervisorRole::Supervisor, None)
        .unwrap();
    let id = session.session_id;

    assert!(matches!(
        agent.change_monitoring_mode(&id, MonitoringMode::Whisper),
        Err(SupervisorError::NotMonitoring(_))
    ));

    agent.start_monitoring(&id, "CA1", MonitoringMode::Listen).unwrap();
    let session = agent.change_monitoring_mode(&id, MonitoringMode::Whisper).unwrap();
    assert_eq!(session.interventions, 1);
    assert_eq!(session.calls_monitored, 1);

    // Same call and mode again changes nothing
    let session = agent.start_monitoring(&id, "CA1", MonitoringMode::Whisper).unwrap();
    assert_eq!(session.calls_monitored, 1);

    assert!(matches!(
        agent.change_monitoring_mode(&id, MonitoringMode::Coach),
        Err(SupervisorError::InsufficientPermissions { .. })
    ));

    assert_eq!(agent.stop_monitoring(&id), Ok(true));
    let names: Vec<_> = seen.lock().iter().map(|e| e.event_name()).collect();
    assert_eq!(
        names,
        vec![
            "call:registered",
            "session:created",
            "supervisor:joined",
            "supervisor:mode-changed",
            "supervisor:left",
        ]
    );
}

#[tokio::test]
async fn switching_calls_leaves_the_previous_one() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");
    live_call(&agent, "CA2");
    let id = agent
        .create_session("sup", "Sam", SupervisorRole::Admin, None)
        .unwrap()
        .session_id;

    agent.start_monitoring(&id, "CA1", MonitoringMode::Listen).unwrap();
    let session = agent.start_monitoring(&id, "CA2", MonitoringMode::Coach).unwrap();

    assert_eq!(session.calls_monitored, 2);
    assert!(agent.get_call("CA1").unwrap().supervisor_sessions.is_empty());
    assert!(seen.lock().iter().any(|e| matches!(
        e,
        SupervisorEvent::SupervisorLeft {
            reason: LeaveReason::SwitchedCall,
            call_sid,
            ..
        } if call_sid == "CA1"
    )));
}

#[tokio::test]
async fn escalation_keyword_flags_the_call_once() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");

    assert_eq!(
        agent
            .process_transcript_message("CA1", Speaker::Customer, "What are your hours?")
            .unwrap(),
        None
    );
    assert_eq!(
        agent
            .process_transcript_message("CA1", Speaker::Customer, "Let me SPEAK TO A HUMAN now")
            .unwrap()
            .as_deref(),
        Some("speak to a human")
    );
    agent
        .process_transcript_message("CA1", Speaker::Customer, "I want a manager")
        .unwrap();

    let call = agent.get_call("CA1").unwrap();
    assert!(call.has_flag(CallFlag::EscalationRequested));
    assert_eq!(call.transcript.len(), 3);

    let alerts = seen
        .lock()
        .iter()
        .filter(|e| e.event_name() == "alert:escalation")
        .count();
    assert_eq!(alerts, 1);
    assert_eq!(agent.get_dashboard_stats().escalations_today, 1);

    assert!(matches!(
        agent.process_transcript_message("missing", Speaker::Agent, "hi"),
        Err(SupervisorError::CallNotFound(_))
    ));
}

#[tokio::test]
async fn sentiment_alert_fires_on_crossing() {
    let agent = agent();
    live_call(&agent, "CA1");

    assert_eq!(agent.update_sentiment("CA1", 0.2), Ok(false));
    assert_eq!(agent.update_sentiment("CA1", -0.7), Ok(true));
    assert_eq!(agent.update_sentiment("CA1", -0.9), Ok(false));
    assert!(agent.get_call("CA1").unwrap().has_flag(CallFlag::NegativeSentiment));

    assert_eq!(agent.update_sentiment("CA1", 0.0), Ok(false));
    assert!(!agent.get_call("CA1").unwrap().has_flag(CallFlag::NegativeSentiment));
    assert_eq!(agent.update_sentiment("CA1", -0.6), Ok(true));
}

#[tokio::test]
async fn private_notes_are_visible_only_to_their_author() {
    let agent = agent();
    live_call(&agent, "CA1");
    agent.add_note("CA1", "sup-a", "caller is upset", false).unwrap();
    agent.add_note("CA1", "sup-a", "coach agent on tone", true).unwrap();
    agent.add_note("CA1", "sup-b", "check billing", true).unwrap();

    let contents = |requester: Option<&str>| -> Vec<String> {
        agent
            .get_notes("CA1", requester)
            .into_iter()
            .map(|n| n.content)
            .collect()
    };
    assert_eq!(contents(None), vec!["caller is upset"]);
    assert_eq!(
        contents(Some("sup-a")),
        vec!["caller is upset", "coach agent on tone"]
    );
    assert_eq!(contents(Some("sup-b")), vec!["caller is upset", "check billing"]);

    assert!(matches!(
        agent.add_note("missing", "sup-a", "x", false),
        Err(SupervisorError::CallNotFound(_))
    ));
}

#[tokio::test]
async fn handoff_workflow() {
    let agent = agent();
    agent
        .register_call(
            NewCall::new("CA1", CallDirection::Inbound)
                .with_state(CallState::InProgress)
                .with_assistant("asst-1"),
        )
        .unwrap();
    assert_eq!(agent.get_dashboard_stats().ai_handled_calls, 1);

    assert!(matches!(
        agent.request_handoff("missing", "x", HandoffPriority::High, None),
        Err(SupervisorError::CallNotFound(_))
    ));
    assert!(matches!(
        agent.complete_handoff("CA1", "agent-7"),
        Err(SupervisorError::HandoffNotFound(_))
    ));

    let request = agent
        .request_handoff("CA1", "billing dispute", HandoffPriority::High, None)
        .unwrap();
    let again = agent
        .request_handoff("CA1", "billing dispute", HandoffPriority::High, None)
        .unwrap();
    assert_eq!(request.handoff_id, again.handoff_id);
    assert!(agent.get_call("CA1").unwrap().has_flag(CallFlag::AiHandoffNeeded));
    assert_eq!(agent.get_pending_handoffs().len(), 1);

    let done = agent.complete_handoff("CA1", "agent-7").unwrap();
    assert_eq!(done.assigned_agent_id.as_deref(), Some("agent-7"));
    assert!(done.completed_at.is_some());

    let call = agent.get_call("CA1").unwrap();
    assert!(!call.has_flag(CallFlag::AiHandoffNeeded));
    assert_eq!(call.agent_id.as_deref(), Some("agent-7"));

    let stats = agent.get_dashboard_stats();
    assert_eq!(stats.ai_handled_calls, 0);
    assert_eq!(stats.handoffs_today, 1);
    assert!(agent.get_pending_handoffs().is_empty());
}

#[tokio::test]
async fn dashboard_stats_reflect_live_calls() {
    let agent = agent();
    agent
        .register_call(NewCall::new("CA1", CallDirection::Inbound))
        .unwrap();
    agent
        .register_call(NewCall::new("CA2", CallDirection::Inbound).with_assistant("asst"))
        .unwrap();
    live_call(&agent, "CA3");
    agent
        .update_call(
            "CA3",
            CallUpdate {
                add_flags: vec![CallFlag::HighValueLead],
                ..Default::default()
            },
        )
        .unwrap();
    agent.update_sentiment("CA3", -0.8).unwrap();
    agent
        .create_session("sup", "Sam", SupervisorRole::Supervisor, None)
        .unwrap();

    let stats = agent.get_dashboard_stats();
    assert_eq!(stats.active_calls, 3);
    assert_eq!(stats.calls_in_queue, 2);
    assert_eq!(stats.ai_handled_calls, 1);
    assert_eq!(stats.active_alerts, 1);
    assert_eq!(stats.active_supervisors, 1);
    assert_eq!(stats.monitoring_sessions, 0);
    assert_eq!(stats.calls_today, 3);
    assert_eq!(stats.average_sentiment, Some(-0.8));
}

#[tokio::test]
async fn capacity_limits_fail_consistently() {
    let agent = SupervisorAgent::new(SupervisorConfig {
        max_active_calls: 1,
        max_supervisor_sessions: 1,
        ..Default::default()
    });
    live_call(&agent, "CA1");
    // Retrying a known call is not a new registration
    live_call(&agent, "CA1");
    assert!(matches!(
        agent.register_call(NewCall::new("CA2", CallDirection::Inbound)),
        Err(SupervisorError::CapacityExceeded { limit: 1, .. })
    ));

    agent
        .create_session("a", "A", SupervisorRole::Admin, None)
        .unwrap();
    assert!(matches!(
        agent.create_session("b", "B", SupervisorRole::Admin, None),
        Err(SupervisorError::CapacityExceeded { limit: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_expired_by_the_cleanup_timer() {
    let agent = SupervisorAgent::new(SupervisorConfig {
        session_idle_timeout_secs: 60,
        cleanup_interval_secs: 10,
        ..Default::default()
    });
    let seen = record(&agent);
    live_call(&agent, "CA1");
    let idle = agent
        .create_session("idle", "Idle", SupervisorRole::Supervisor, None)
        .unwrap();
    let busy = agent
        .create_session("busy", "Busy", SupervisorRole::Supervisor, None)
        .unwrap();
    agent
        .start_monitoring(&idle.session_id, "CA1", MonitoringMode::Listen)
        .unwrap();
    agent.start_session_cleanup();

    for _ in 0..7 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(agent.stop_monitoring(&busy.session_id), Ok(false));
    }

    assert!(agent.get_session(&idle.session_id).is_none());
    assert!(agent.get_session(&busy.session_id).is_some());
    assert!(agent.get_call("CA1").unwrap().supervisor_sessions.is_empty());
    assert!(seen.lock().iter().any(|e| matches!(
        e,
        SupervisorEvent::SupervisorLeft { reason: LeaveReason::IdleTimeout, .. }
    )));
    agent.destroy();
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let agent = agent();
    let seen = record(&agent);
    live_call(&agent, "CA1");
    let session = agent
        .create_session("sup", "Sam", SupervisorRole::Admin, None)
        .unwrap();
    agent
        .start_monitoring(&session.session_id, "CA1", MonitoringMode::Listen)
        .unwrap();
    agent.start_session_cleanup();

    agent.destroy();
    let after_first = seen.lock().len();
    agent.destroy();

    assert!(agent.is_destroyed());
    assert_eq!(seen.lock().len(), after_first);
    assert!(agent.get_active_sessions().is_empty());
    assert!(agent.get_active_calls().is_empty());
    assert_eq!(agent.events().listener_count(), 0);
    assert!(seen
        .lock()
        .iter()
        .any(|e| matches!(e, SupervisorEvent::SessionEnded { reason: LeaveReason::Shutdown, .. })));
}
