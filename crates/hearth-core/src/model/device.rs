// ── Device domain type ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The hub itself, or an attached sub-device ("slave").
///
/// Business attributes beyond the core set are opaque to this client and
/// captured in `attrs` via `#[serde(flatten)]` so nothing the hub sends is
/// silently dropped. The whole struct participates in reconciliation
/// equality -- an attribute-only change is still an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Device {
    /// The device's full field set as event params.
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

    #[test]
    fn opaque_attrs_are_preserved() {
        let device: Device = serde_json::from_value(json!({
            "name": "greenhouse",
            "online": true,
            "enabled": true,
            "firmware": "2.4.1",
            "zone": {"floor": 1}
        }))
        .unwrap();

        assert_eq!(device.attrs["firmware"], "2.4.1");
        assert_eq!(device.attrs["zone"]["floor"], 1);

        let params = device.params();
        assert_eq!(params["name"], "greenhouse");
        assert_eq!(params["firmware"], "2.4.1");
    }

    #[test]
    fn attr_change_breaks_equality() {
        let a: Device = serde_json::from_value(json!({"name": "x", "fw": "1"})).unwrap();
        let b: Device = serde_json::from_value(json!({"name": "x", "fw": "2"})).unwrap();
        assert_ne!(a, b);
    }
}
