// ── Long-poll notification channel ──
//
// A perpetual loop: request outstanding events, wait for the response or a
// timeout/error, schedule the next request. The poll timeout is 1s on the
// very first call after start or right after a failure (snappy
// post-reconnect path), otherwise a long keepalive interval (cheap on hub
// resources).
//
// The `epoch` token is the concurrency guard against stale responses after
// a stop/restart: every run captures the epoch at start; a response whose
// captured epoch no longer matches the current one is discarded silently --
// not even the error/reconnect path runs.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use hearth_api::HttpClient;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::model::Event;

/// Poll timeout for the first call after start or after a failure.
const FAST_POLL: Duration = Duration::from_secs(1);

/// Reconnect delay inside the fast-retry window.
const FAST_RETRY: Duration = Duration::from_secs(1);

/// Consecutive failures that still reconnect fast (ride out transient
/// blips); beyond this the configured retry interval applies.
const FAST_RETRY_LIMIT: u32 = 2;

/// Channel state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Stopped,
    /// A long poll is outstanding.
    Waiting,
    /// A response batch is being delivered.
    Processing,
}

/// Published on every poll failure that is not inside an ignored-errors
/// window.
#[derive(Debug, Clone)]
pub struct ListenStatus {
    pub error: String,
    pub consecutive_failures: u32,
    pub retry_in: Duration,
}

pub(crate) type DeliverFn = Arc<dyn Fn(Vec<Event>) + Send + Sync>;

/// The notification channel. One outstanding long poll at a time.
pub(crate) struct Notifier {
    client: Arc<HttpClient>,
    keepalive: Duration,
    retry_interval: Duration,
    /// Current run identity; 0 means stopped.
    epoch: AtomicU64,
    /// Monotonic source for epochs, never reset.
    last_epoch: AtomicU64,
    session_id: OnceLock<String>,
    /// Maintenance window (e.g. firmware flash in progress): poll errors
    /// are logged and retried without counting or surfacing.
    ignore_errors: AtomicBool,
    failures: AtomicU32,
    state: watch::Sender<ListenState>,
    status: watch::Sender<Option<ListenStatus>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Notifier {
    pub(crate) fn new(
        client: Arc<HttpClient>,
        keepalive: Duration,
        retry_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ListenState::Stopped);
        let (status, _) = watch::channel(None);
        Self {
            client,
            keepalive,
            retry_interval,
            epoch: AtomicU64::new(0),
            last_epoch: AtomicU64::new(0),
            session_id: OnceLock::new(),
            ignore_errors: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            state,
            status,
            cancel: Mutex::new(None),
        }
    }

    /// Start the poll loop.
    ///
    /// Panics if already running: a double start is a programming error,
    /// not a recoverable condition.
    pub(crate) fn start(self: &Arc<Self>, deliver: DeliverFn) {
        assert!(
            !self.is_running(),
            "notification channel started while already running"
        );

        let epoch = self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.epoch.store(epoch, Ordering::SeqCst);
        self.failures.store(0, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(token.clone());

        self.state.send_replace(ListenState::Waiting);
        info!(epoch, "notification channel started");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(epoch, deliver, token).await });
    }

    /// Stop the poll loop.
    ///
    /// Clears the epoch, then cancels the loop task. Cancellation drops an
    /// in-flight poll future (the request is abandoned, not awaited); the
    /// epoch guard additionally covers the window where a response was
    /// already in hand when the cancellation was observed, so a stale batch
    /// is never delivered either way.
    pub(crate) fn stop(&self) {
        self.epoch.store(0, Ordering::SeqCst);
        if let Some(token) = self.cancel.lock().expect("cancel lock poisoned").take() {
            token.cancel();
        }
        self.state.send_replace(ListenState::Stopped);
        info!("notification channel stopped");
    }

    pub(crate) fn is_running(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != 0
    }

    pub(crate) fn set_ignore_errors(&self, ignore: bool) {
        self.ignore_errors.store(ignore, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> watch::Receiver<ListenState> {
        self.state.subscribe()
    }

    pub(crate) fn status(&self) -> watch::Receiver<Option<ListenStatus>> {
        self.status.subscribe()
    }

    /// The session id, generated once, lazily, on first use.
    fn session_id(&self) -> &str {
        self.session_id.get_or_init(|| {
            use std::fmt::Write as _;

            let seed = uuid::Uuid::new_v4();
            let digest = Sha256::digest(seed.as_bytes());
            // Opaque to the hub; hex keeps it URL-safe.
            digest.iter().fold(String::with_capacity(64), |mut out, b| {
                let _ = write!(out, "{b:02x}");
                out
            })
        })
    }

    // ── The loop ─────────────────────────────────────────────────────

    async fn run(&self, epoch: u64, deliver: DeliverFn, cancel: CancellationToken) {
        let session_id = self.session_id().to_owned();
        let mut fast = true;

        loop {
            let timeout = if fast { FAST_POLL } else { self.keepalive };

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                r = self.client.listen(&session_id, timeout) => r,
            };

            // A stop/restart happened mid-flight: discard silently, and do
            // not even run the error/reconnect path.
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(epoch, "discarding response from superseded poll run");
                break;
            }

            match result {
                Ok(events) => {
                    self.failures.store(0, Ordering::SeqCst);
                    fast = false;

                    if events.is_empty() {
                        trace!("listen keepalive (no events)");
                    } else {
                        self.state.send_replace(ListenState::Processing);
                        debug!(count = events.len(), "delivering event batch");
                        deliver(events.into_iter().map(Event::from).collect());
                        self.state.send_replace(ListenState::Waiting);
                    }
                    // Immediately re-issue the next poll.
                }
                Err(e) => {
                    fast = true;

                    if self.ignore_errors.load(Ordering::SeqCst) {
                        // Maintenance window: no counting, no surfacing.
                        debug!(error = %e, "listen error ignored (maintenance window)");
                        if sleep_unless_cancelled(FAST_RETRY, &cancel).await {
                            break;
                        }
                        continue;
                    }

                    let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    let delay = retry_delay(failures, self.retry_interval);
                    warn!(
                        error = %e,
                        failures,
                        retry_in_secs = delay.as_secs(),
                        "listen failed"
                    );
                    self.status.send_replace(Some(ListenStatus {
                        error: e.to_string(),
                        consecutive_failures: failures,
                        retry_in: delay,
                    }));

                    if sleep_unless_cancelled(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        debug!(epoch, "poll loop exiting");
    }
}

/// Returns `true` if cancelled before the delay elapsed.
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

/// Reconnect delay policy: a short fast-retry window, then a fixed larger
/// interval. The failure counter resets to zero on any success.
fn retry_delay(consecutive_failures: u32, retry_interval: Duration) -> Duration {
    if consecutive_failures <= FAST_RETRY_LIMIT {
        FAST_RETRY
    } else {
        retry_interval
    }
}

// ── Tests ────────────────────────────────────────────────────────────
