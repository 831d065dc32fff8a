// ── Snapshot diffing ──
//
// Pure functions: (old snapshot, new snapshot) -> synthetic events.
// The emitted events use the live channel's vocabulary exactly, so a
// consumer that was offline during the drift sees the same stream it would
// have seen connected.
//
// Emission order within a collection: removals, then additions, then
// updates (then value changes for ports). Across collections the caller
// emits union events (sub-devices) before leaf events (ports).

use std::collections::BTreeMap;

use crate::model::{Device, Event, EventKind, Port};

/// Synthetic update for the singleton hub device, if anything changed.
pub(crate) fn diff_device(old: &Device, new: &Device) -> Option<Event> {
    (old != new).then(|| Event::synthetic(EventKind::DeviceUpdate, new.params()))
}

/// Diff the sub-device collection.
pub(crate) fn diff_slaves(
    old: &BTreeMap<String, Device>,
    new: &BTreeMap<String, Device>,
) -> Vec<Event> {
    let mut events = Vec::new();

    for (name, device) in old {
        if !new.contains_key(name) {
            events.push(Event::synthetic(EventKind::SlaveRemove, device.params()));
        }
    }
    for (name, device) in new {
        if !old.contains_key(name) {
            events.push(Event::synthetic(EventKind::SlaveAdd, device.params()));
        }
    }
    for (name, device) in new {
        if old.get(name).is_some_and(|prev| prev != device) {
            events.push(Event::synthetic(EventKind::SlaveUpdate, device.params()));
        }
    }

    events
}

/// Diff the port collection.
///
/// Definition changes and value changes are independent classes: a port
/// whose unit changed *and* whose value moved produces both a
/// `port-update` and a `value-change`.
pub(crate) fn diff_ports(old: &BTreeMap<String, Port>, new: &BTreeMap<String, Port>) -> Vec<Event> {
    let mut events = Vec::new();

    for (id, port) in old {
        if !new.contains_key(id) {
            events.push(Event::synthetic(EventKind::PortRemove, port.params()));
        }
    }
    for (id, port) in new {
        if !old.contains_key(id) {
            events.push(Event::synthetic(EventKind::PortAdd, port.params()));
        }
    }
    for (id, port) in new {
        if old.get(id).is_some_and(|prev| !prev.definition_eq(port)) {
            events.push(Event::synthetic(EventKind::PortUpdate, port.params()));
        }
    }
    for (id, port) in new {
        if old.get(id).is_some_and(|prev| !prev.value_eq(port)) {
            events.push(Event::synthetic(EventKind::ValueChange, port.params()));
        }
    }

    events
}

// ── Tests ────────────────────────────────────────────────────────────
