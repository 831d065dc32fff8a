// ── Port domain type ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single input/output point on the hub or a sub-device.
///
/// Reconciliation distinguishes two independent change classes: the port's
/// *definition* (everything except `value` and `last_sync`) and its
/// *value*. Each class gets its own synthetic event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub online: bool,
    /// When the hub last synced the value from the hardware. Volatile;
    /// excluded from definition comparison.
    #[serde(default)]
    pub last_sync: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Port {
    /// Definition equality: excludes the volatile `value` and `last_sync`.
    pub fn definition_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.enabled == other.enabled
            && self.online == other.online
            && self.extra == other.extra
    }

    /// Value equality, independent of the definition check.
    pub fn value_eq(&self, other: &Self) -> bool {
        self.value == other.value
    }

    /// The port's full field set as event params.
    pub fn params(&self) -> Map<String, Value> {
        if let Ok(Value::Object(map)) = serde_json::to_value(self) {
            map
        } else {
            Map::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn port(value: Value, last_sync: Option<i64>, unit: &str) -> Port {
        serde_json::from_value(json!({
            "id": "p1",
            "value": value,
            "enabled": true,
            "online": true,
            "last_sync": last_sync,
            "unit": unit
        }))
        .unwrap()
    }

    #[test]
    fn value_change_does_not_touch_definition() {
        let a = port(json!(21.5), Some(100), "C");
        let b = port(json!(22.0), Some(200), "C");

        assert!(a.definition_eq(&b));
        assert!(!a.value_eq(&b));
    }

    #[test]
    fn definition_change_is_independent_of_value() {
        let a = port(json!(21.5), Some(100), "C");
        let b = port(json!(21.5), Some(100), "F");

        assert!(!a.definition_eq(&b));
        assert!(a.value_eq(&b));
    }
}
