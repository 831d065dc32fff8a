// ── Event value type ──
//
// One sum type of event kinds shared by the live channel and the synthetic
// reconciliation path, so every consumer needs exactly one decoding path.
// Provenance (`fake`) is tagged for diagnostics only, never for differing
// handling logic.

use std::str::FromStr;

use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// The event vocabulary of the hub's notification channel.
///
/// `Unknown` passes through kinds this client does not model; they are
/// fanned out untouched but never mutate the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    DeviceUpdate,
    SlaveAdd,
    SlaveRemove,
    SlaveUpdate,
    PortAdd,
    PortRemove,
    PortUpdate,
    ValueChange,
    #[strum(default)]
    Unknown(String),
}

/// A change notification, either delivered by the hub or synthesized by
/// cache reconciliation. Immutable once constructed; cloned for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub params: Map<String, Value>,
    /// Set when an open expectation matched this event -- a locally
    /// initiated mutation recognized its own resulting notification.
    pub expected: bool,
    /// Synthesized locally by reconciliation rather than received from
    /// the channel.
    pub fake: bool,
}

impl Event {
    /// An event as delivered by the live channel.
    pub fn live(kind: EventKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            expected: false,
            fake: false,
        }
    }

    /// An event synthesized by reconciliation.
    pub fn synthetic(kind: EventKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            expected: false,
            fake: true,
        }
    }

    /// Convenience param lookup.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// A string-valued param, if present and a string.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

impl From<hearth_api::WireEvent> for Event {
    fn from(wire: hearth_api::WireEvent) -> Self {
        // `Unknown` is the FromStr default, so this never fails.
        let kind = EventKind::from_str(&wire.kind).unwrap_or(EventKind::Unknown(wire.kind));
        Self::live(kind, wire.params)
    }
}
