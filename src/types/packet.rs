//! Acquisition payloads: feature packets and preview frames.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier of a tracked subject (e.g. `ID_3`).
pub type EntityId = String;

/// Name of a measured variable (e.g. `happy`, `left_eye`).
pub type VariableName = String;

/// Measurements for one entity at one instant.
pub type VariableMap = BTreeMap<VariableName, f64>;

/// One timestamped bundle of per-entity variable measurements.
///
/// Produced once per acquisition tick and never mutated afterwards. A
/// variable that was not observed for an entity is simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub timestamp: f64,
    #[serde(default)]
    pub entities: BTreeMap<EntityId, VariableMap>,
}

impl DataPacket {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            entities: BTreeMap::new(),
        }
    }

    /// Builder-style helper used by loaders and tests.
    pub fn with_value(mut self, entity: &str, variable: &str, value: f64) -> Self {
        self.insert(entity, variable, value);
        self
    }

    pub fn insert(&mut self, entity: &str, variable: &str, value: f64) {
        self.entities
            .entry(entity.to_string())
            .or_default()
            .insert(variable.to_string(), value);
    }

    /// Value of `variable` for `entity`, if it was observed and is finite.
    pub fn value(&self, entity: &str, variable: &str) -> Option<f64> {
        self.entities
            .get(entity)
            .and_then(|vars| vars.get(variable))
            .copied()
            .filter(|v| v.is_finite())
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Opaque preview image emitted by a producer alongside a packet.
///
/// Pixel layout is the producer's business; the core only forwards the
/// newest frame to the presentation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Frame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_skips_missing_and_nan() {
        let packet = DataPacket::new(0.0)
            .with_value("ID_1", "happy", 0.5)
            .with_value("ID_1", "sad", f64::NAN);

        assert_eq!(packet.value("ID_1", "happy"), Some(0.5));
        assert_eq!(packet.value("ID_1", "sad"), None);
        assert_eq!(packet.value("ID_1", "anger"), None);
        assert_eq!(packet.value("ID_2", "happy"), None);
    }

    #[test]
    fn test_packet_json_shape() {
        let packet = DataPacket::new(3.0).with_value("ID_1", "happy", 0.25);
        let json = serde_json::to_value(&packet).expect("serialize packet");
        assert_eq!(json["timestamp"], 3.0);
        assert_eq!(json["entities"]["ID_1"]["happy"], 0.25);

        let parsed: DataPacket =
            serde_json::from_str(r#"{"timestamp": 1.5}"#).expect("entities default to empty");
        assert!(parsed.is_empty());
    }
}
