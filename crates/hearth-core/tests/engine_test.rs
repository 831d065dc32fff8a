#![allow(clippy::unwrap_used)]
// End-to-end engine tests against a wiremock hub.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hearth_core::{
    AccessLevel, Engine, EngineConfig, Event, EventKind, Method, TlsMode,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Engine) {
    let server = MockServer::start().await;
    let config = EngineConfig {
        url: server.uri().parse().unwrap(),
        username: "admin".into(),
        password: SecretString::from("hunter2".to_string()),
        tls: TlsMode::System,
        load_retry: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    (server, Engine::new(config).unwrap())
}

/// Mount the standard load endpoints.
async fn mount_snapshot(
    server: &MockServer,
    device: serde_json::Value,
    slaves: serde_json::Value,
    ports: serde_json::Value,
) {
    for (endpoint, body) in [
        ("device", device),
        ("slaves", slaves),
        ("ports", ports),
        ("prefs", json!({"theme": "dark"})),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/api/{endpoint}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

/// A listen mock that never has anything to say, so started engines idle
/// instead of erroring.
async fn mount_quiet_listen(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(server)
        .await;
}

fn obj(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let serde_json::Value::Object(map) = value else {
        panic!("expected object");
    };
    map
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<std::sync::Arc<Event>>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}

// ── Loading ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_load_fires_ready_and_emits_nothing() {
    let (server, engine) = setup().await;
    mount_snapshot(
        &server,
        json!({"name": "hub", "online": true, "enabled": true}),
        json!({}),
        json!({"p1": {"id": "p1", "value": 21.5}}),
    )
    .await;

    let mut rx = engine.subscribe();
    engine.load(AccessLevel::Admin).await;

    engine.mirror().device_ready().await;
    engine.mirror().ports_ready().await;
    assert_eq!(engine.mirror().device().name, "hub");
    assert_eq!(engine.mirror().ports()["p1"].value, json!(21.5));
    assert!(drain(&mut rx).is_empty(), "baseline install is silent");
}

#[tokio::test]
async fn test_user_level_load_skips_slaves() {
    let (server, engine) = setup().await;
    mount_snapshot(
        &server,
        json!({"name": "hub"}),
        json!({}),
        json!({}),
    )
    .await;

    engine.load(AccessLevel::User).await;

    let slave_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/slaves")
        .count();
    assert_eq!(slave_fetches, 0);
}

#[tokio::test]
async fn test_load_retries_until_the_hub_answers() {
    let (server, engine) = setup().await;

    // Two failing passes, then a healthy snapshot.
    Mock::given(method("GET"))
        .and(path("/api/device"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_snapshot(&server, json!({"name": "hub"}), json!({}), json!({})).await;

    engine.load(AccessLevel::Admin).await;
    assert_eq!(engine.mirror().device().name, "hub");
}

#[tokio::test]
async fn test_reload_emits_synthetic_events_for_drift() {
    let (server, engine) = setup().await;
    mount_snapshot(
        &server,
        json!({"name": "hub", "fw": 1}),
        json!({"shed": {"name": "shed"}}),
        json!({
            "p1": {"id": "p1", "value": 1},
            "p2": {"id": "p2", "value": 2}
        }),
    )
    .await;
    engine.load(AccessLevel::Admin).await;

    // The hub drifted while we were away: p1 changed value, p2 vanished,
    // p3 appeared, the shed is gone.
    server.reset().await;
    mount_snapshot(
        &server,
        json!({"name": "hub", "fw": 2}),
        json!({}),
        json!({
            "p1": {"id": "p1", "value": 9},
            "p3": {"id": "p3", "value": 3}
        }),
    )
    .await;

    let mut rx = engine.subscribe();
    engine.load(AccessLevel::Admin).await;

    let events = drain(&mut rx);
    let kinds: Vec<String> = events.iter().map(|e| e.kind.to_string()).collect();
    assert_eq!(
        kinds,
        vec![
            "device-update",
            "slave-remove",
            "port-remove",
            "port-add",
            "value-change"
        ]
    );
    assert!(events.iter().all(|e| e.fake), "reconciliation events are synthetic");

    // Removal carries the removed entity's params.
    assert_eq!(events[2].param_str("id"), Some("p2"));
    // The mirror caught up.
    assert_eq!(engine.mirror().ports()["p1"].value, json!(9));
    assert!(!engine.mirror().ports().contains_key("p2"));
}

// ── Live channel ────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_event_flows_through_pipeline() {
    let (server, engine) = setup().await;
    mount_snapshot(&server, json!({"name": "hub"}), json!({}), json!({
        "p1": {"id": "p1", "value": 1}
    }))
    .await;
    engine.load(AccessLevel::Admin).await;

    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"type": "value-change", "params": {"id": "p1", "value": 7}}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quiet_listen(&server).await;

    let mut rx = engine.subscribe();
    engine.start();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within the first fast poll")
        .unwrap();
    engine.stop();

    assert_eq!(event.kind, EventKind::ValueChange);
    assert!(!event.fake);
    assert_eq!(engine.mirror().ports()["p1"].value, json!(7));
}

#[tokio::test]
async fn test_expected_event_is_recognized_as_self_caused() {
    let (server, engine) = setup().await;
    mount_snapshot(&server, json!({"name": "hub"}), json!({}), json!({
        "p1": {"id": "p1", "value": 1}
    }))
    .await;
    engine.load(AccessLevel::Admin).await;

    Mock::given(method("POST"))
        .and(path("/api/ports/p1/value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"type": "value-change", "params": {"id": "p1", "value": 9}}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quiet_listen(&server).await;

    // Register before starting so the poll cannot win the race.
    let handle = engine.expect(
        Some(EventKind::ValueChange),
        Some(obj(json!({"id": "p1"}))),
        Duration::from_secs(5),
    );

    let mut rx = engine.subscribe();
    engine.start();
    engine
        .call(
            Method::POST,
            "ports/p1/value",
            &[],
            Some(&json!({"value": 9})),
            None,
            Some(handle),
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within the first fast poll")
        .unwrap();
    engine.stop();

    assert!(event.expected, "self-caused event carries the flag");
    assert_eq!(engine.pending_expectations(), 0);
}

#[tokio::test]
async fn test_failed_call_withdraws_its_expectation() {
    let (server, engine) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/ports/ghost/value"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "no such port"
        })))
        .mount(&server)
        .await;

    let result = engine
        .call_expecting(
            Some(EventKind::ValueChange),
            None,
            Duration::from_secs(5),
            Method::POST,
            "ports/ghost/value",
            &[],
            Some(&json!({"value": 1})),
            None,
        )
        .await;

    assert!(result.is_err());
    assert_eq!(
        engine.pending_expectations(),
        0,
        "no dangling expectation after a failed call"
    );
}

#[tokio::test]
async fn test_response_in_flight_at_stop_is_discarded() {
    let (server, engine) = setup().await;
    mount_snapshot(&server, json!({"name": "hub"}), json!({}), json!({
        "p1": {"id": "p1", "value": 1}
    }))
    .await;
    engine.load(AccessLevel::Admin).await;

    // The poll answers only after we have already stopped.
    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([
                    {"type": "port-remove", "params": {"id": "p1"}}
                ]))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let mut rx = engine.subscribe();
    engine.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(drain(&mut rx).is_empty(), "stale batch never delivered");
    assert!(
        engine.mirror().ports().contains_key("p1"),
        "stale batch never applied"
    );
}

#[tokio::test]
async fn test_restart_discards_stale_poll_and_keeps_polling() {
    let (server, engine) = setup().await;
    mount_snapshot(&server, json!({"name": "hub"}), json!({}), json!({
        "p1": {"id": "p1", "value": 1}
    }))
    .await;
    engine.load(AccessLevel::Admin).await;

    // The first run's poll is answered only long after the restart.
    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([
                    {"type": "port-remove", "params": {"id": "p1"}}
                ]))
                .set_delay(Duration::from_millis(800)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quiet_listen(&server).await;

    let mut rx = engine.subscribe();
    engine.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop();
    engine.start();

    // Past the stale response's arrival; the new run has polled since.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(engine.is_running(), "restarted run keeps polling");
    engine.stop();

    assert!(drain(&mut rx).is_empty(), "stale batch never delivered");
    assert!(
        engine.mirror().ports().contains_key("p1"),
        "stale batch never applied"
    );
}

#[tokio::test]
async fn test_poll_failure_publishes_status_with_fast_retry() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quiet_listen(&server).await;

    let mut status = engine.listen_status();
    engine.start();

    tokio::time::timeout(Duration::from_secs(5), status.changed())
        .await
        .expect("status published")
        .unwrap();
    let published = status.borrow().clone().unwrap();
    engine.stop();

    assert_eq!(published.consecutive_failures, 1);
    assert_eq!(published.retry_in, Duration::from_secs(1));
}

#[tokio::test]
async fn test_ignored_errors_window_stays_silent() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/listen"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "error": "slave offline"
        })))
        .mount(&server)
        .await;

    engine.set_ignore_listen_errors(true);
    let status = engine.listen_status();
    engine.start();

    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.stop();

    assert!(
        status.borrow().is_none(),
        "maintenance-window errors are never surfaced"
    );
}

#[tokio::test]
async fn test_stop_start_cycle_resumes_polling() {
    let (server, engine) = setup().await;
    mount_quiet_listen(&server).await;

    engine.start();
    assert!(engine.is_running());
    engine.stop();
    assert!(!engine.is_running());

    engine.start();
    assert!(engine.is_running());
    engine.stop();
}
