// ── Authoritative cache ──
//
// Owns the local copies of device, sub-devices, ports, and preferences.
// Each collection has a one-shot ready signal that fires on its first
// successful load and never reverts.
//
// The first load installs the baseline directly. Later loads only *compute*
// the diff; the cache converges as the returned synthetic events flow back
// through `update_from_event`, the same entry point live events take, so
// mutation happens in exactly one place.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::reconcile;
use crate::model::{Device, Event, EventKind, Port};

/// `None` until the collection's first successful load.
#[derive(Default)]
struct State {
    device: Option<Device>,
    slaves: Option<BTreeMap<String, Device>>,
    ports: Option<BTreeMap<String, Port>>,
    prefs: Option<Value>,
    /// First full load completed; events delivered before this are ignored
    /// (startup race protection).
    loaded: bool,
}

/// Locally cached mirror of the hub's state.
pub struct Mirror {
    state: RwLock<State>,
    device_ready: watch::Sender<bool>,
    slaves_ready: watch::Sender<bool>,
    ports_ready: watch::Sender<bool>,
    prefs_ready: watch::Sender<bool>,
}

impl Mirror {
    pub(crate) fn new() -> Self {
        let (device_ready, _) = watch::channel(false);
        let (slaves_ready, _) = watch::channel(false);
        let (ports_ready, _) = watch::channel(false);
        let (prefs_ready, _) = watch::channel(false);
        Self {
            state: RwLock::new(State::default()),
            device_ready,
            slaves_ready,
            ports_ready,
            prefs_ready,
        }
    }

    // ── Snapshot application (load path) ─────────────────────────────

    /// Apply a complete fetched snapshot, returning the synthetic events in
    /// emission order: device update first, then sub-devices, then ports.
    pub(crate) fn apply_snapshot(
        &self,
        device: Device,
        slaves: Option<BTreeMap<String, Device>>,
        ports: BTreeMap<String, Port>,
        prefs: Option<Value>,
    ) -> Vec<Event> {
        let mut events = self.apply_device(device);
        if let Some(slaves) = slaves {
            events.extend(self.apply_slaves(slaves));
        }
        events.extend(self.apply_ports(ports));
        if let Some(prefs) = prefs {
            self.apply_prefs(prefs);
        }
        self.mark_loaded();
        events
    }

    /// Install the singleton device, or diff against the cached one.
    pub(crate) fn apply_device(&self, new: Device) -> Vec<Event> {
        let mut state = self.write();
        if let Some(old) = &state.device {
            reconcile::diff_device(old, &new).into_iter().collect()
        } else {
            state.device = Some(new);
            drop(state);
            self.device_ready.send_replace(true);
            Vec::new()
        }
    }

    /// Install the sub-device collection, or diff against the cached one.
    pub(crate) fn apply_slaves(&self, new: BTreeMap<String, Device>) -> Vec<Event> {
        let mut state = self.write();
        if let Some(old) = &state.slaves {
            reconcile::diff_slaves(old, &new)
        } else {
            state.slaves = Some(new);
            drop(state);
            self.slaves_ready.send_replace(true);
            Vec::new()
        }
    }

    /// Install the port collection, or diff against the cached one.
    pub(crate) fn apply_ports(&self, new: BTreeMap<String, Port>) -> Vec<Event> {
        let mut state = self.write();
        if let Some(old) = &state.ports {
            reconcile::diff_ports(old, &new)
        } else {
            state.ports = Some(new);
            drop(state);
            self.ports_ready.send_replace(true);
            Vec::new()
        }
    }

    /// Install the preferences tree. Opaque: replaced wholesale, no
    /// synthetic events.
    pub(crate) fn apply_prefs(&self, new: Value) {
        let mut state = self.write();
        let first = state.prefs.is_none();
        state.prefs = Some(new);
        drop(state);

        if first {
            self.prefs_ready.send_replace(true);
        }
    }

    /// Mark the first full load as completed, unblocking event application.
    pub(crate) fn mark_loaded(&self) {
        self.write().loaded = true;
    }

    /// Whether the first full load has completed.
    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    // ── Event application ────────────────────────────────────────────

    /// The single mutation entry point, applied by both live and synthetic
    /// events. Unknown targets are logged, never fatal -- the cache
    /// self-heals on the next full reconciliation.
    pub(crate) fn update_from_event(&self, event: &Event) {
        let mut state = self.write();
        if !state.loaded {
            debug!(kind = %event.kind, "event before first load, ignored");
            return;
        }

        match &event.kind {
            EventKind::DeviceUpdate => {
                if let Some(device) = parse_device(event) {
                    state.device = Some(device);
                } else {
                    warn!("device-update with unparsable params");
                }
            }
            EventKind::SlaveAdd => match (parse_device(event), state.slaves.as_mut()) {
                (Some(device), Some(slaves)) => {
                    slaves.insert(device.name.clone(), device);
                }
                (Some(_), None) => debug!("slave-add for an untracked collection"),
                (None, _) => warn!("slave-add with unparsable params"),
            },
            EventKind::SlaveUpdate => match (parse_device(event), state.slaves.as_mut()) {
                (Some(device), Some(slaves)) if slaves.contains_key(&device.name) => {
                    slaves.insert(device.name.clone(), device);
                }
                (Some(device), Some(_)) => warn!(name = %device.name, "update for unknown slave"),
                (Some(_), None) => debug!("slave-update for an untracked collection"),
                (None, _) => warn!("slave-update with unparsable params"),
            },
            EventKind::SlaveRemove => match (event.param_str("name"), state.slaves.as_mut()) {
                (Some(name), Some(slaves)) => {
                    if slaves.remove(name).is_none() {
                        warn!(name, "remove for unknown slave");
                    }
                }
                (Some(_), None) => debug!("slave-remove for an untracked collection"),
                (None, _) => warn!("slave-remove without a name"),
            },
            EventKind::PortAdd => match (parse_port(event), state.ports.as_mut()) {
                (Some(port), Some(ports)) => {
                    ports.insert(port.id.clone(), port);
                }
                (Some(_), None) => debug!("port-add for an untracked collection"),
                (None, _) => warn!("port-add with unparsable params"),
            },
            EventKind::PortUpdate => match (parse_port(event), state.ports.as_mut()) {
                (Some(port), Some(ports)) if ports.contains_key(&port.id) => {
                    ports.insert(port.id.clone(), port);
                }
                (Some(port), Some(_)) => warn!(id = %port.id, "update for unknown port"),
                (Some(_), None) => debug!("port-update for an untracked collection"),
                (None, _) => warn!("port-update with unparsable params"),
            },
            EventKind::PortRemove => match (event.param_str("id"), state.ports.as_mut()) {
                (Some(id), Some(ports)) => {
                    if ports.remove(id).is_none() {
                        warn!(id, "remove for unknown port");
                    }
                }
                (Some(_), None) => debug!("port-remove for an untracked collection"),
                (None, _) => warn!("port-remove without an id"),
            },
            EventKind::ValueChange => {
                let port = event
                    .param_str("id")
                    .and_then(|id| state.ports.as_mut().and_then(|ports| ports.get_mut(id)));
                if let Some(port) = port {
                    if let Some(value) = event.param("value") {
                        port.value = value.clone();
                    }
                    if let Some(sync) = event.param("last_sync").and_then(Value::as_i64) {
                        port.last_sync = Some(sync);
                    }
                } else {
                    warn!(id = event.param_str("id"), "value-change for unknown port");
                }
            }
            EventKind::Unknown(kind) => {
                debug!(kind, "unmodelled event kind, not applied");
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────
    //
    // Calling an accessor before the corresponding ready signal fired is a
    // contract violation and panics.

    pub fn device(&self) -> Device {
        self.read()
            .device
            .clone()
            .expect("device cache accessed before ready")
    }

    pub fn slaves(&self) -> BTreeMap<String, Device> {
        self.read()
            .slaves
            .clone()
            .expect("slave cache accessed before ready")
    }

    pub fn ports(&self) -> BTreeMap<String, Port> {
        self.read()
            .ports
            .clone()
            .expect("port cache accessed before ready")
    }

    pub fn prefs(&self) -> Value {
        self.read()
            .prefs
            .clone()
            .expect("prefs cache accessed before ready")
    }

    // ── Ready signals ────────────────────────────────────────────────
    //
    // Each resolves exactly once, on the collection's first successful
    // load. Callers wanting a bounded wait wrap these in
    // `tokio::time::timeout` and treat expiry as recoverable.

    pub async fn device_ready(&self) {
        wait_ready(self.device_ready.subscribe()).await;
    }

    pub async fn slaves_ready(&self) {
        wait_ready(self.slaves_ready.subscribe()).await;
    }

    pub async fn ports_ready(&self) {
        wait_ready(self.ports_ready.subscribe()).await;
    }

    pub async fn prefs_ready(&self) {
        wait_ready(self.prefs_ready.subscribe()).await;
    }

    // ── Internals ────────────────────────────────────────────────────

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().expect("mirror lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().expect("mirror lock poisoned")
    }
}

async fn wait_ready(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn parse_device(event: &Event) -> Option<Device> {
    serde_json::from_value(Value::Object(event.params.clone())).ok()
}

fn parse_port(event: &Event) -> Option<Port> {
    serde_json::from_value(Value::Object(event.params.clone())).ok()
}

// ── Tests ────────────────────────────────────────────────────────────
