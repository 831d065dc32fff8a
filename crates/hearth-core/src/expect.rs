// ── Expectation registry ──
//
// Correlates locally-initiated mutations with their eventual resulting
// notification: a caller registers "I expect an event matching
// {kind, partial params} within T", attaches the returned handle to its
// call, and the matching event arrives flagged `expected = true`.
//
// Matching is exact-subset: every key the spec names must be present in
// the event's params with an identical value; extra event keys are
// ignored. First structurally-matching spec wins (insertion order), and
// at most one spec is ever consumed per event.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::model::{Event, EventKind};

/// How often expired specs are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Expectation {
    handle: u64,
    /// `None` matches any kind.
    kind: Option<EventKind>,
    /// `None` matches any params.
    params: Option<Map<String, Value>>,
    added_at: Instant,
    timeout: Duration,
}

impl Expectation {
    fn matches(&self, event: &Event) -> bool {
        if self.kind.as_ref().is_some_and(|k| *k != event.kind) {
            return false;
        }
        self.params.as_ref().is_none_or(|partial| {
            partial
                .iter()
                .all(|(key, value)| event.params.get(key) == Some(value))
        })
    }
}

/// Registry of open expectations.
///
/// Handles are strictly increasing and never reused; a handle that was
/// matched or expired never marks a later event as expected.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    // Insertion order is matching priority, so a Vec, not a map.
    open: Mutex<Vec<Expectation>>,
    next_handle: AtomicU64,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expectation and return its handle.
    pub fn expect(
        &self,
        kind: Option<EventKind>,
        params: Option<Map<String, Value>>,
        timeout: Duration,
    ) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.open
            .lock()
            .expect("expectation lock poisoned")
            .push(Expectation {
                handle,
                kind,
                params,
                added_at: Instant::now(),
                timeout,
            });
        handle
    }

    /// Remove an expectation without matching it.
    ///
    /// Used when the originating call itself failed and will never produce
    /// its event. Returns `true` if the handle was still open.
    pub fn unexpect(&self, handle: u64) -> bool {
        let mut open = self.open.lock().expect("expectation lock poisoned");
        let before = open.len();
        open.retain(|spec| spec.handle != handle);
        before != open.len()
    }

    /// Match `event` against open specs, consuming at most one.
    ///
    /// On match the spec is deleted and the event marked `expected`.
    pub fn note_expected(&self, event: &mut Event) {
        let mut open = self.open.lock().expect("expectation lock poisoned");
        if let Some(pos) = open.iter().position(|spec| spec.matches(event)) {
            let spec = open.remove(pos);
            debug!(handle = spec.handle, kind = %event.kind, "event was expected");
            event.expected = true;
        }
    }

    /// Delete specs older than their own timeout.
    ///
    /// The original caller is not notified -- the flag only suppresses
    /// "what changed" noise for the lifetime of the window, and the
    /// mutation itself already succeeded or failed independently.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut open = self.open.lock().expect("expectation lock poisoned");
        open.retain(|spec| {
            let expired = now.duration_since(spec.added_at) > spec.timeout;
            if expired {
                warn!(handle = spec.handle, "expected event never arrived");
            }
            !expired
        });
    }

    /// Number of open expectations.
    pub fn len(&self) -> usize {
        self.open.lock().expect("expectation lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ────────────────────────────────────────────────────────────
