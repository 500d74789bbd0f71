//! Home Assistant MQTT discovery payloads

use serde::Serialize;

/// Discovery config for one entity.
///
/// Field order is fixed so the serialized payload is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryPayload {
    pub name: String,
    pub unique_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,

    pub availability_topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
    pub device: DiscoveryDevice,
}

/// Device grouping shared by related entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

/// Entity platform a payload is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Sensor,
    BinarySensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

/// A payload together with where it is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: DiscoveryPayload,
}

impl DiscoveryMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}
