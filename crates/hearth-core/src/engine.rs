// ── Engine ──
//
// The consumer-facing object. Owns the transport client, the expectation
// registry, the notification channel, and the mirror, and wires them into
// one delivery pipeline:
//
//     event arrives (live or synthetic)
//       → registry match (sets `expected`)
//       → mirror update
//       → broadcast fan-out
//
// Construction is explicit and injected; there is no global state. Dropping
// the engine without `stop()` cancels nothing by itself, so applications
// call `stop()` on shutdown the same way they called `start()` on startup.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hearth_api::{HttpClient, Method, TransportConfig};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AccessLevel, EngineConfig};
use crate::error::CoreError;
use crate::expect::{ExpectationRegistry, SWEEP_INTERVAL};
use crate::listen::{ListenState, ListenStatus, Notifier};
use crate::mirror::Mirror;
use crate::model::{Device, Event, EventKind, Port};

/// Fan-out buffer depth. A subscriber that lags this far behind loses the
/// oldest events and sees a `Lagged` error from its receiver.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    config: EngineConfig,
    client: Arc<HttpClient>,
    registry: ExpectationRegistry,
    notifier: Arc<Notifier>,
    mirror: Mirror,
    events: broadcast::Sender<Arc<Event>>,
    sweep_cancel: Mutex<Option<CancellationToken>>,
}

impl Inner {
    /// The single delivery pipeline for live and synthetic events.
    fn dispatch(&self, mut event: Event) {
        self.registry.note_expected(&mut event);
        self.mirror.update_from_event(&event);
        // No subscribers is fine; the mirror is already updated.
        let _ = self.events.send(Arc::new(event));
    }
}

/// Client-side state synchronization engine for one hub.
///
/// Cheap to clone; all clones share the same connection, mirror, and
/// registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Build an engine from configuration. No network traffic happens here;
    /// the first request is issued by `load` or `start`.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.timeout,
        };
        let client = Arc::new(HttpClient::new(
            config.url.clone(),
            config.username.clone(),
            &config.password,
            &transport,
        )?);
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&client),
            config.keepalive,
            config.retry_interval,
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                registry: ExpectationRegistry::new(),
                notifier,
                mirror: Mirror::new(),
                events,
                sweep_cancel: Mutex::new(None),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the notification channel and the expectation expiry sweep.
    ///
    /// Panics if already running; stop first.
    pub fn start(&self) {
        let sweep = CancellationToken::new();
        let previous = self
            .inner
            .sweep_cancel
            .lock()
            .expect("sweep cancel lock poisoned")
            .replace(sweep.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.spawn_sweep(sweep);

        let inner = Arc::clone(&self.inner);
        self.inner
            .notifier
            .start(Arc::new(move |events: Vec<Event>| {
                for event in events {
                    inner.dispatch(event);
                }
            }));
    }

    /// Stop the notification channel and the sweep task.
    ///
    /// An in-flight poll response arriving after this point is discarded.
    /// Open expectations survive a stop/start cycle.
    pub fn stop(&self) {
        self.inner.notifier.stop();
        if let Some(token) = self
            .inner
            .sweep_cancel
            .lock()
            .expect("sweep cancel lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.notifier.is_running()
    }

    fn spawn_sweep(&self, cancel: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = tick.tick() => inner.registry.sweep_expired(),
                }
            }
        });
    }

    // ── Loading & reconciliation ─────────────────────────────────────

    /// Fetch all collections the access level permits and install or
    /// reconcile them, retrying forever on failure.
    ///
    /// The first successful pass installs the baseline (no events) and
    /// fires the ready signals; later passes emit synthetic events for
    /// everything that drifted while the channel was down.
    pub async fn load(&self, level: AccessLevel) {
        loop {
            match self.try_load(level).await {
                Ok(events) => {
                    info!(synthetic = events.len(), "load complete");
                    for event in events {
                        self.inner.dispatch(event);
                    }
                    return;
                }
                Err(e) => {
                    let retry = self.inner.config.load_retry;
                    warn!(error = %e, retry_in_secs = retry.as_secs(), "load failed");
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }

    /// One load pass. Any single fetch failure fails the whole pass;
    /// collections already applied keep their (possibly fresher) state.
    async fn try_load(&self, level: AccessLevel) -> Result<Vec<Event>, CoreError> {
        let client = &self.inner.client;

        let device: Device = client.get("device").await?;
        let slaves = if level >= AccessLevel::Admin {
            Some(client.get::<BTreeMap<String, Device>>("slaves").await?)
        } else {
            None
        };
        let ports: BTreeMap<String, Port> = client.get("ports").await?;
        let prefs = if level >= AccessLevel::User {
            Some(client.get::<Value>("prefs").await?)
        } else {
            None
        };

        Ok(self.inner.mirror.apply_snapshot(device, slaves, ports, prefs))
    }

    // ── Events & expectations ────────────────────────────────────────

    /// Subscribe to the event fan-out, live and synthetic alike, in
    /// arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.events.subscribe()
    }

    /// Register an expectation; the next matching event arrives with
    /// `expected = true`.
    pub fn expect(
        &self,
        kind: Option<EventKind>,
        params: Option<Map<String, Value>>,
        timeout: Duration,
    ) -> u64 {
        self.inner.registry.expect(kind, params, timeout)
    }

    /// Withdraw an open expectation. Returns `true` if it was still open.
    pub fn unexpect(&self, handle: u64) -> bool {
        self.inner.registry.unexpect(handle)
    }

    /// Number of open expectations.
    pub fn pending_expectations(&self) -> usize {
        self.inner.registry.len()
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Issue a request through the gateway.
    ///
    /// If `expectation` names an open handle and the call fails, the
    /// expectation is withdrawn so it cannot mark an unrelated later event.
    /// Mutations are never auto-retried.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        timeout: Option<Duration>,
        expectation: Option<u64>,
    ) -> Result<Value, CoreError> {
        match self.inner.client.call(method, path, query, body, timeout).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Some(handle) = expectation {
                    if self.inner.registry.unexpect(handle) {
                        debug!(handle, "withdrew expectation of failed call");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Register an expectation, then issue the call that should cause the
    /// expected event. The expectation is withdrawn if the call fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn call_expecting(
        &self,
        kind: Option<EventKind>,
        params: Option<Map<String, Value>>,
        expect_timeout: Duration,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CoreError> {
        let handle = self.inner.registry.expect(kind, params, expect_timeout);
        self.call(method, path, query, body, timeout, Some(handle))
            .await
    }

    /// Route the next call through the named sub-device.
    pub fn set_slave_for_next_call(&self, slave: Option<&str>) {
        self.inner.client.set_slave_for_next_call(slave);
    }

    // ── Observability ────────────────────────────────────────────────

    /// Suppress counting and surfacing of poll errors, e.g. during a
    /// firmware flash the client itself initiated.
    pub fn set_ignore_listen_errors(&self, ignore: bool) {
        self.inner.notifier.set_ignore_errors(ignore);
    }

    /// Notification channel state.
    pub fn listen_state(&self) -> watch::Receiver<ListenState> {
        self.inner.notifier.state()
    }

    /// Most recent poll failure, if any.
    pub fn listen_status(&self) -> watch::Receiver<Option<ListenStatus>> {
        self.inner.notifier.status()
    }

    /// Count of in-flight non-listen requests.
    pub fn activity(&self) -> watch::Receiver<u32> {
        self.inner.client.activity()
    }

    /// The locally cached mirror.
    pub fn mirror(&self) -> &Mirror {
        &self.inner.mirror
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_engine() -> Engine {
        let config = EngineConfig {
            url: "http://127.0.0.1:1".parse().unwrap(),
            ..EngineConfig::default()
        };
        Engine::new(config).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        map
    }

    #[tokio::test]
    async fn dispatch_marks_expected_before_fan_out() {
        let engine = test_engine();
        let mut rx = engine.subscribe();

        engine.expect(
            Some(EventKind::PortUpdate),
            Some(params(json!({"id": "p1"}))),
            Duration::from_secs(5),
        );

        engine.inner.dispatch(Event::live(
            EventKind::PortUpdate,
            params(json!({"id": "p1", "value": 5})),
        ));

        let event = rx.recv().await.unwrap();
        assert!(event.expected, "flag set before the subscriber saw it");
        assert_eq!(engine.pending_expectations(), 0);
    }

    #[tokio::test]
    async fn fan_out_preserves_arrival_order() {
        let engine = test_engine();
        let mut rx = engine.subscribe();

        for id in ["a", "b", "c"] {
            engine.inner.dispatch(Event::live(
                EventKind::ValueChange,
                params(json!({"id": id})),
            ));
        }

        for id in ["a", "b", "c"] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.param_str("id"), Some(id));
        }
    }

    #[tokio::test]
    async fn unexpect_through_engine_clears_handle() {
        let engine = test_engine();
        let handle = engine.expect(None, None, Duration::from_secs(5));
        assert_eq!(engine.pending_expectations(), 1);

        assert!(engine.unexpect(handle));
        assert_eq!(engine.pending_expectations(), 0);
        assert!(!engine.unexpect(handle));
    }

    #[tokio::test]
    async fn starts_not_running() {
        let engine = test_engine();
        assert!(!engine.is_running());
        assert_eq!(*engine.listen_state().borrow(), ListenState::Stopped);
    }
}
