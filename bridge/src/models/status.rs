//! Vehicle status data model

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// A primitive status value
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

/// Shape of a value, used to pick a discovery component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Binary,
    Numeric,
    Text,
}

impl StatusValue {
    /// Convert a JSON value; nested values are kept as their JSON text
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => StatusValue::Text(s.clone()),
            Value::Number(n) => StatusValue::Number(n.clone()),
            Value::Bool(b) => StatusValue::Bool(*b),
            Value::Null => StatusValue::Text(String::new()),
            other => StatusValue::Text(other.to_string()),
        }
    }

    /// Classify the value, treating "TRUE"/"FALSE" and numeric text by content
    pub fn kind(&self) -> ValueKind {
        match self {
            StatusValue::Bool(_) => ValueKind::Binary,
            StatusValue::Number(_) => ValueKind::Numeric,
            StatusValue::Text(s) => {
                if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                    ValueKind::Binary
                } else if !s.is_empty() && s.trim().parse::<f64>().is_ok() {
                    ValueKind::Numeric
                } else {
                    ValueKind::Text
                }
            }
        }
    }

    /// The payload published for this value
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Text(s) => f.write_str(s),
            StatusValue::Number(n) => write!(f, "{}", n),
            StatusValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One named value from a status snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct StatusItem {
    pub name: String,
    pub value: StatusValue,
}

impl StatusItem {
    pub fn new(name: impl Into<String>, value: StatusValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Lower-cased key prefix before the first underscore
    pub fn category(&self) -> String {
        category_of(&self.name)
    }
}

/// Lower-cased key prefix before the first underscore, or the whole key
pub fn category_of(key: &str) -> String {
    key.split('_').next().unwrap_or(key).to_lowercase()
}

/// The full set of status items from one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub items: Vec<StatusItem>,
}

impl StatusSnapshot {
    /// Build a snapshot from a flat JSON object
    pub fn from_map(map: &serde_json::Map<String, Value>) -> Self {
        Self {
            items: map
                .iter()
                .map(|(k, v)| StatusItem::new(k.clone(), StatusValue::from_json(v)))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&StatusValue> {
        self.items
            .iter()
            .find(|item| item.name.eq_ignore_ascii_case(key))
            .map(|item| &item.value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A vehicle alert; every property other than the key is published
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub key: String,
    pub properties: BTreeMap<String, StatusValue>,
}

/// Status and alerts as returned by one status call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleStatus {
    pub status: StatusSnapshot,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVehicleStatus {
    #[serde(default)]
    vehicle_status: Value,
    #[serde(default)]
    vehicle_alerts: Value,
}

impl VehicleStatus {
    /// Parse a status response.
    ///
    /// `vehicleStatus` is either a list of `{key, value}` entries or an object
    /// of such lists (`coreStatus`, `evStatus`); both flatten into one snapshot.
    pub fn from_response(response: Value) -> Result<Self, serde_json::Error> {
        let raw: RawVehicleStatus = serde_json::from_value(response)?;

        let entries: Vec<Value> = match raw.vehicle_status {
            Value::Array(list) => list,
            Value::Object(groups) => groups
                .into_iter()
                .filter_map(|(_, group)| match group {
                    Value::Array(list) => Some(list),
                    _ => None,
                })
                .flatten()
                .collect(),
            _ => Vec::new(),
        };
        let items = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<KeyValue>(entry).ok())
            .map(|kv| StatusItem::new(kv.key, StatusValue::from_json(&kv.value)))
            .collect();

        let alerts = match raw.vehicle_alerts {
            Value::Array(list) => list,
            _ => Vec::new(),
        };
        let alerts = alerts
            .into_iter()
            .filter_map(|entry| {
                let Value::Object(mut entry) = entry else {
                    return None;
                };
                let key = match entry.remove("key") {
                    Some(Value::String(key)) => key,
                    _ => return None,
                };
                let properties = entry
                    .iter()
                    .map(|(k, v)| (k.clone(), StatusValue::from_json(v)))
                    .collect();
                Some(Alert { key, properties })
            })
            .collect();

        Ok(Self {
            status: StatusSnapshot { items },
            alerts,
        })
    }
}

/// Last reported vehicle position
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub fields: BTreeMap<String, StatusValue>,
}

impl Position {
    /// Parse a position response (`{"position": {...}}`)
    pub fn from_response(response: &Value) -> Option<Self> {
        let position = response.get("position")?.as_object()?;
        let mut fields: BTreeMap<String, StatusValue> = position
            .iter()
            .map(|(k, v)| (k.clone(), StatusValue::from_json(v)))
            .collect();
        if let (Some(lat), Some(lon)) = (fields.get("latitude"), fields.get("longitude")) {
            let latlong = format!("{}, {}", lat, lon);
            fields.insert("latlong".to_string(), StatusValue::Text(latlong));
        }
        Some(Self { fields })
    }

    pub fn coordinates(&self) -> Option<(String, String)> {
        Some((
            self.fields.get("latitude")?.to_string(),
            self.fields.get("longitude")?.to_string(),
        ))
    }
}
