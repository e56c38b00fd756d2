use callwatch_presence_core::{
    AgentPresenceService, HeartbeatConfig, PresenceConfig, PresenceStatus, StatusReason,
};
use callwatch_presence_gateway::{
    close_code, ChannelTransport, GatewayConfig, GatewayError, GatewayEvent, PresenceGateway,
    Transport, TransportMessage, ALERTS_CHANNEL,
};
use callwatch_supervisor_core::{
    CallDirection, NewCall, Speaker, SupervisorAgent, SupervisorConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

type Frames = UnboundedReceiver<TransportMessage>;

struct Floor {
    presence: Arc<AgentPresenceService>,
    transport: Arc<ChannelTransport>,
    gateway: Arc<PresenceGateway>,
}

fn floor_with(presence: PresenceConfig, gateway: GatewayConfig) -> Floor {
    let presence = AgentPresenceService::new(presence);
    let transport = Arc::new(ChannelTransport::new());
    let gateway = PresenceGateway::new(gateway, presence.clone(), transport.clone());
    Floor {
        presence,
        transport,
        gateway,
    }
}

fn floor() -> Floor {
    floor_with(
        PresenceConfig {
            heartbeat: HeartbeatConfig {
                interval_ms: 3_600_000,
                missed_threshold: 3,
                grace_period_ms: 5_000,
            },
            ..Default::default()
        },
        GatewayConfig::default(),
    )
}

fn frame(event_type: &str, payload: Value) -> String {
    let mut value = json!({
        "eventType": event_type,
        "eventId": uuid::Uuid::new_v4().to_string(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    if let (Some(obj), Some(extra)) = (value.as_object_mut(), payload.as_object()) {
        obj.extend(extra.clone());
    }
    value.to_string()
}

fn drain(rx: &mut Frames) -> Vec<TransportMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

fn of_type(messages: &[TransportMessage], event_type: &str) -> Vec<Value> {
    messages
        .iter()
        .filter_map(TransportMessage::as_frame)
        .map(|text| serde_json::from_str::<Value>(text).unwrap())
        .filter(|value| value["eventType"] == event_type)
        .collect()
}

fn closes(messages: &[TransportMessage]) -> Vec<u16> {
    messages
        .iter()
        .filter_map(|m| match m {
            TransportMessage::Close { code, .. } => Some(*code),
            TransportMessage::Frame(_) => None,
        })
        .collect()
}

impl Floor {
    fn connect(&self, connection_id: &str, agent_id: &str) -> Frames {
        let rx = self.transport.open(connection_id);
        self.gateway
            .handle_message(
                connection_id,
                &frame(
                    "presence.connect",
                    json!({"agentId": agent_id, "connectionId": connection_id}),
                ),
            )
            .unwrap();
        rx
    }

    fn set_status(&self, connection_id: &str, agent_id: &str, from: &str, to: &str) {
        self.gateway
            .handle_message(
                connection_id,
                &frame(
                    "presence.status_change",
                    json!({
                        "agentId": agent_id,
                        "previousStatus": from,
                        "newStatus": to,
                        "reason": "manual",
                    }),
                ),
            )
            .unwrap();
    }

    fn record_events(&self) -> Arc<Mutex<Vec<GatewayEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.gateway
            .events()
            .on(move |event| sink.lock().push(event.clone()));
        seen
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test(start_paused = true)]
async fn connect_replies_and_subscribes_to_roster() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");

    let messages = drain(&mut c1);
    let connected = of_type(&messages, "presence.connected");
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0]["agent"]["agentId"], "a1");
    assert_eq!(connected[0]["agent"]["connectionId"], "c1");
    assert_eq!(connected[0]["heartbeatIntervalMs"], 3_600_000);
    assert_eq!(floor.gateway.channels_of("c1"), vec!["roster"]);
    assert_eq!(floor.gateway.bound_agent("c1").as_deref(), Some("a1"));
}

#[tokio::test(start_paused = true)]
async fn rapid_status_churn_yields_one_roster_broadcast() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");
    settle().await;
    drain(&mut c1);

    floor.set_status("c1", "a1", "online", "away");
    floor.set_status("c1", "a1", "away", "online");
    floor.set_status("c1", "a1", "online", "dnd");
    floor.set_status("c1", "a1", "dnd", "online");
    floor.set_status("c1", "a1", "online", "busy");
    assert!(floor.gateway.is_roster_pending());
    settle().await;

    let messages = drain(&mut c1);
    assert_eq!(of_type(&messages, "presence.status_changed").len(), 5);
    let rosters = of_type(&messages, "presence.roster");
    assert_eq!(rosters.len(), 1);
    assert_eq!(rosters[0]["agents"][0]["status"], "busy");
    assert!(!floor.gateway.is_roster_pending());
}

#[tokio::test(start_paused = true)]
async fn steady_churn_still_reaches_peers_every_window() {
    let floor = floor();
    let _c1 = floor.connect("c1", "a1");
    let mut c2 = floor.connect("c2", "a2");
    settle().await;
    drain(&mut c2);

    // One change every 400ms against the 500ms window, for 10s.
    for i in 0..25 {
        if i % 2 == 0 {
            floor.set_status("c1", "a1", "online", "away");
        } else {
            floor.set_status("c1", "a1", "away", "online");
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    settle().await;

    let rosters = of_type(&drain(&mut c2), "presence.roster");
    assert!(rosters.len() >= 10, "only {} rosters during churn", rosters.len());
    let last = rosters.last().unwrap()["agents"].as_array().unwrap().clone();
    let a1 = last.iter().find(|agent| agent["agentId"] == "a1").unwrap();
    assert_eq!(a1["status"], "away");
}

#[tokio::test(start_paused = true)]
async fn full_channel_drops_extra_subscriber_only_for_that_channel() {
    let floor = floor_with(
        PresenceConfig::default(),
        GatewayConfig {
            max_subscribers_per_channel: 3,
            ..Default::default()
        },
    );
    let mut conns: Vec<Frames> = (1..=4)
        .map(|n| floor.connect(&format!("c{n}"), &format!("a{n}")))
        .collect();
    assert!(floor.gateway.subscribe("c4", ALERTS_CHANNEL));
    assert_eq!(floor.gateway.subscriber_count("roster"), 3);
    assert_eq!(floor.gateway.channels_of("c4"), vec![ALERTS_CHANNEL]);
    settle().await;
    for rx in conns.iter_mut() {
        drain(rx);
    }

    floor.set_status("c1", "a1", "online", "away");
    settle().await;
    floor
        .gateway
        .publish(ALERTS_CHANNEL, "supervisor.alert", &json!({"alert": "test"}))
        .unwrap();

    for rx in conns.iter_mut().take(3) {
        assert_eq!(of_type(&drain(rx), "presence.roster").len(), 1);
    }
    let fourth = drain(&mut conns[3]);
    assert!(of_type(&fourth, "presence.roster").is_empty());
    assert_eq!(of_type(&fourth, "supervisor.alert").len(), 1);
}

#[tokio::test]
async fn out_of_protocol_frames_are_reported_not_applied() {
    let floor = floor();
    let _c1 = floor.transport.open("c1");
    let seen = floor.record_events();

    let frames = [
        frame("presence.roster", json!({"agents": []})),
        frame("presence.teleport", json!({"agentId": "a1"})),
        "{not json".to_string(),
        json!({"eventType": "presence.connect", "agentId": "a1", "connectionId": "c1"}).to_string(),
        frame("presence.connect", json!({"connectionId": "c1"})),
    ];
    for text in &frames {
        assert!(matches!(
            floor.gateway.handle_message("c1", text),
            Err(GatewayError::InvalidMessage(_))
        ));
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), frames.len());
    assert!(seen
        .iter()
        .all(|e| matches!(e, GatewayEvent::InvalidMessage { .. })));
    match &seen[0] {
        GatewayEvent::InvalidMessage { event_type, .. } => {
            assert_eq!(event_type.as_deref(), Some("presence.roster"))
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(floor.presence.get_agent("a1").is_none());
    assert!(floor.transport.has_connection("c1"));
}

#[tokio::test(start_paused = true)]
async fn frames_for_another_agent_are_dropped() {
    let floor = floor();
    let _c1 = floor.connect("c1", "a1");
    let mut c2 = floor.connect("c2", "a2");
    drain(&mut c2);

    floor.set_status("c2", "a1", "online", "dnd");
    floor
        .gateway
        .handle_message(
            "c2",
            &frame(
                "presence.heartbeat",
                json!({
                    "agentId": "a1",
                    "heartbeat": {"agentId": "a1", "sequenceNumber": 1, "timestamp": 0},
                }),
            ),
        )
        .unwrap();
    floor
        .gateway
        .handle_message("c2", &frame("presence.disconnect", json!({"agentId": "a1"})))
        .unwrap();

    assert_eq!(floor.presence.get_agent("a1").unwrap().status, PresenceStatus::Online);
    let messages = drain(&mut c2);
    assert!(of_type(&messages, "presence.status_changed").is_empty());
    assert!(of_type(&messages, "presence.heartbeat_ack").is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_acknowledged_to_the_sender() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");
    drain(&mut c1);

    floor
        .gateway
        .handle_message(
            "c1",
            &frame(
                "presence.heartbeat",
                json!({
                    "agentId": "a1",
                    "heartbeat": {"agentId": "a1", "sequenceNumber": 7, "timestamp": 0},
                }),
            ),
        )
        .unwrap();

    let acks = of_type(&drain(&mut c1), "presence.heartbeat_ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["sequenceNumber"], 7);
    assert_eq!(acks[0]["status"], "online");
    assert!(acks[0]["rttMs"].as_i64().unwrap() >= 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_closes_the_old_connection_with_4001() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");
    let mut c2 = floor.connect("c2", "a1");

    assert_eq!(closes(&drain(&mut c1)), vec![close_code::SUPERSEDED]);
    assert_eq!(of_type(&drain(&mut c2), "presence.connected").len(), 1);
    let agent = floor.presence.get_agent("a1").unwrap();
    assert_eq!(agent.connection_id.as_deref(), Some("c2"));
    assert_eq!(agent.status_reason, StatusReason::ConnectionRestored);
    assert_eq!(floor.gateway.bound_agent("c1"), None);
    assert!(!floor.transport.has_connection("c1"));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_closes_with_4002() {
    let floor = floor_with(
        PresenceConfig {
            heartbeat: HeartbeatConfig {
                interval_ms: 1_000,
                missed_threshold: 3,
                grace_period_ms: 500,
            },
            ..Default::default()
        },
        GatewayConfig::default(),
    );
    let mut c1 = floor.connect("c1", "a1");

    tokio::time::sleep(Duration::from_millis(4_000)).await;

    assert_eq!(closes(&drain(&mut c1)), vec![close_code::HEARTBEAT_TIMEOUT]);
    let agent = floor.presence.get_agent("a1").unwrap();
    assert_eq!(agent.status, PresenceStatus::Offline);
    assert_eq!(agent.status_reason, StatusReason::HeartbeatTimeout);
    assert_eq!(floor.gateway.bound_agent("c1"), None);
}

#[tokio::test(start_paused = true)]
async fn query_response_goes_only_to_the_requester() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");
    let mut c2 = floor.connect("c2", "a2");
    floor.set_status("c2", "a2", "online", "away");
    drain(&mut c1);
    drain(&mut c2);

    floor
        .gateway
        .handle_message(
            "c1",
            &frame(
                "presence.query",
                json!({"correlationId": "q1", "statusFilter": ["away"]}),
            ),
        )
        .unwrap();

    let responses = of_type(&drain(&mut c1), "presence.query_response");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["correlationId"], "q1");
    let agents = responses[0]["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agentId"], "a2");
    assert!(of_type(&drain(&mut c2), "presence.query_response").is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_transport_close_use_their_own_reasons() {
    let floor = floor();
    let _c1 = floor.connect("c1", "a1");
    let _c2 = floor.connect("c2", "a2");

    floor
        .gateway
        .handle_message("c1", &frame("presence.disconnect", json!({"agentId": "a1"})))
        .unwrap();
    floor.gateway.handle_connection_closed("c2");

    let a1 = floor.presence.get_agent("a1").unwrap();
    assert_eq!(a1.status, PresenceStatus::Offline);
    assert_eq!(a1.status_reason, StatusReason::Logout);
    let a2 = floor.presence.get_agent("a2").unwrap();
    assert_eq!(a2.status, PresenceStatus::Offline);
    assert_eq!(a2.status_reason, StatusReason::ConnectionLost);
    assert!(floor.gateway.channels_of("c2").is_empty());
}

#[tokio::test(start_paused = true)]
async fn destroy_closes_everything_once() {
    let floor = floor();
    let mut c1 = floor.connect("c1", "a1");
    let mut idle = floor.transport.open("idle");
    floor.set_status("c1", "a1", "online", "away");
    assert!(floor.gateway.is_roster_pending());

    floor.gateway.destroy();
    floor.gateway.destroy();
    settle().await;

    let messages = drain(&mut c1);
    assert_eq!(closes(&messages), vec![close_code::GOING_AWAY]);
    assert!(of_type(&messages, "presence.roster").is_empty());
    assert_eq!(closes(&drain(&mut idle)), vec![close_code::GOING_AWAY]);
    assert!(floor.transport.is_empty());
    assert_eq!(floor.presence.get_agent("a1").unwrap().status, PresenceStatus::Offline);
    assert_eq!(floor.presence.events().listener_count(), 0);
    assert_eq!(
        floor.gateway.handle_message("c1", &frame("presence.query", json!({}))),
        Err(GatewayError::Destroyed)
    );
}

#[tokio::test(start_paused = true)]
async fn supervisor_alerts_reach_the_alerts_channel() {
    let floor = floor();
    let supervisor = SupervisorAgent::new(SupervisorConfig::default());
    floor.gateway.attach_supervisor(&supervisor);

    let mut wallboard = floor.transport.open("wallboard");
    assert!(floor.gateway.subscribe("wallboard", ALERTS_CHANNEL));

    supervisor
        .register_call(NewCall::new("CA1", CallDirection::Inbound))
        .unwrap();
    supervisor
        .process_transcript_message("CA1", Speaker::Customer, "Let me speak to a human please")
        .unwrap();

    let alerts = of_type(&drain(&mut wallboard), "supervisor.alert");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alert"], "alert:escalation");
    assert_eq!(alerts[0]["callSid"], "CA1");

    assert!(floor.gateway.detach_supervisor());
    supervisor.update_sentiment("CA1", -0.9).unwrap();
    assert!(of_type(&drain(&mut wallboard), "supervisor.alert").is_empty());
}
