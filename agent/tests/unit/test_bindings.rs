//! MQTT topic binding tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rumqttc::QoS;

use visagent::deploy::state::OrchestratorState;
use visagent::models::deployment::DeploymentConfig;
use visagent::mqtt::bindings::TopicBindings;
use visagent::mqtt::control::register_callbacks;
use visagent::mqtt::topics::{MqttTopics, TopicKind};

use crate::fakes::RecordingTransport;

fn setup() -> (Arc<RecordingTransport>, TopicBindings, Arc<OrchestratorState>) {
    let transport = Arc::new(RecordingTransport::default());
    let bindings =
        TopicBindings::new(transport.clone(), MqttTopics::default(), QoS::AtLeastOnce).unwrap();
    let state = Arc::new(OrchestratorState::new(DeploymentConfig::default()).unwrap());
    (transport, bindings, state)
}

#[test]
fn test_subscribes_every_listening_topic() {
    let (transport, bindings, state) = setup();
    register_callbacks(&bindings, &state).unwrap();
    bindings.subscribe_all().unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 9);
    assert!(calls.contains(&"sub inspection/view_label_check AtLeastOnce".to_string()));
    assert!(!calls.iter().any(|c| c.contains("inspection/publish_results")));
}

#[test]
fn test_rename_keeps_the_same_callback() {
    let (transport, bindings, state) = setup();
    register_callbacks(&bindings, &state).unwrap();
    bindings.subscribe_all().unwrap();

    bindings
        .rename(TopicKind::StartRecord, "line1/record/start")
        .unwrap();

    // The old name no longer reaches anything
    assert!(!bindings.dispatch("inspection/start_record", b""));
    assert!(!state.is_recording());

    assert!(bindings.dispatch("line1/record/start", b""));
    assert!(state.is_recording());

    let calls = transport.calls();
    let unsub = calls
        .iter()
        .position(|c| c == "unsub inspection/start_record")
        .unwrap();
    let sub = calls
        .iter()
        .position(|c| c == "sub line1/record/start AtLeastOnce")
        .unwrap();
    assert!(unsub < sub);
}

#[test]
fn test_rename_before_subscribe_only_moves_binding() {
    let (transport, bindings, _) = setup();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bindings
        .bind(
            TopicKind::SaveFrame,
            Arc::new(move |_: &[u8]| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    bindings.rename(TopicKind::SaveFrame, "line1/save").unwrap();
    assert!(transport.calls().is_empty());
    assert!(bindings.dispatch("line1/save", b""));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rename_to_same_name_is_a_noop() {
    let (transport, bindings, state) = setup();
    register_callbacks(&bindings, &state).unwrap();
    bindings.subscribe_all().unwrap();
    let before = transport.calls().len();

    bindings
        .rename(TopicKind::SaveFrame, "inspection/save_frame")
        .unwrap();
    assert_eq!(transport.calls().len(), before);
}

#[test]
fn test_rename_rejects_wildcards() {
    let (_, bindings, _) = setup();
    assert!(bindings.rename(TopicKind::RecvFrame, "line1/#").is_err());
    assert!(bindings.rename(TopicKind::RecvFrame, "line1/+/frames").is_err());
    assert_eq!(bindings.topic(TopicKind::RecvFrame), "inspection/recv_frame");
}

#[test]
fn test_control_messages_reach_state() {
    let (_, bindings, state) = setup();
    register_callbacks(&bindings, &state).unwrap();

    assert!(bindings.dispatch("inspection/stop_publish", b""));
    assert!(!state.config().publishing);
    assert!(bindings.dispatch("inspection/save_frame", b""));
    assert!(state.take_save_frame());
    assert!(bindings.dispatch("inspection/recv_frame", &[0xFF, 0xD8]));
    assert_eq!(state.received_frame().unwrap().bytes.as_slice(), &[0xFF, 0xD8]);
    assert!(!bindings.dispatch("inspection/unknown", b""));
}
