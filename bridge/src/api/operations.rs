//! Catalogue of remote operations callable by name

use serde_json::Value;

use crate::errors::BridgeError;
use crate::models::command::Kwargs;

/// Whether an operation only reads or acts on the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Service,
}

/// A named operation and the keyword parameters it takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub kind: OperationKind,
}

impl Operation {
    const fn query(name: &'static str, params: &'static [&'static str]) -> Self {
        Self {
            name,
            params,
            kind: OperationKind::Query,
        }
    }

    const fn service(name: &'static str, params: &'static [&'static str]) -> Self {
        Self {
            name,
            params,
            kind: OperationKind::Service,
        }
    }
}

/// Operations exposed by the InControl client
pub const OPERATIONS: &[Operation] = &[
    Operation::query("get_attributes", &[]),
    Operation::query("get_position", &[]),
    Operation::query("get_departure_timers", &[]),
    Operation::query("get_services", &[]),
    Operation::query("get_service_status", &["service_id"]),
    Operation::query("get_subscription_packages", &[]),
    Operation::query("get_trips", &["count"]),
    Operation::query("reverse_geocode", &["latitude", "longitude"]),
    Operation::service("get_health_status", &[]),
    Operation::service("honk_blink", &[]),
    Operation::service("lock", &["pin"]),
    Operation::service("unlock", &["pin"]),
    Operation::service("reset_alarm", &["pin"]),
    Operation::service("remote_engine_start", &["pin", "target_value"]),
    Operation::service("remote_engine_stop", &["pin"]),
    Operation::service("preconditioning_start", &["target_temp"]),
    Operation::service("preconditioning_stop", &[]),
    Operation::service("climate_prioritize", &["priority"]),
    Operation::service("charging_start", &[]),
    Operation::service("charging_stop", &[]),
    Operation::service("set_max_soc", &["max_charge_level"]),
    Operation::service("set_one_off_max_soc", &["max_charge_level"]),
    Operation::service(
        "add_departure_timer",
        &["index", "year", "month", "day", "hour", "minute"],
    ),
    Operation::service("enable_privacy_mode", &["pin"]),
    Operation::service("disable_privacy_mode", &["pin"]),
];

/// Find an operation by exact name
pub fn find(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

/// A required argument rendered as a string (numbers are accepted)
pub fn arg_string(kwargs: &Kwargs, name: &str) -> Result<String, BridgeError> {
    match kwargs.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(BridgeError::InvalidArguments(format!(
            "'{}' must be a string or number, got {}",
            name, other
        ))),
        None => Err(missing(name)),
    }
}

/// A required integer argument (numeric strings are accepted)
pub fn arg_i64(kwargs: &Kwargs, name: &str) -> Result<i64, BridgeError> {
    match kwargs.get(name) {
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| not_integer(name, n)),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| not_integer(name, s)),
        Some(other) => Err(not_integer(name, other)),
        None => Err(missing(name)),
    }
}

fn missing(name: &str) -> BridgeError {
    BridgeError::InvalidArguments(format!("missing required parameter '{}'", name))
}

fn not_integer(name: &str, value: impl std::fmt::Display) -> BridgeError {
    BridgeError::InvalidArguments(format!("'{}' must be an integer, got {}", name, value))
}
