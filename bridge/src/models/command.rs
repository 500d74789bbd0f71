//! Inbound command descriptors

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::BridgeError;

/// Keyword arguments forwarded to a remote operation
pub type Kwargs = Map<String, Value>;

/// Parameter name filled from configuration when a command omits it
pub const PIN_PARAM: &str = "pin";

/// A decoded command message.
///
/// `kwargs` is the current schema; `arg` is the single positional value
/// sent by older clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandDescriptor {
    pub command: String,

    #[serde(default)]
    pub kwargs: Option<Kwargs>,

    /// Legacy single argument
    #[serde(default)]
    pub arg: Option<Value>,

    /// Status key for a single-key `get_status`
    #[serde(default)]
    pub key: Option<String>,

    /// Level for `set_log_level`
    #[serde(default)]
    pub level: Option<String>,
}

impl CommandDescriptor {
    /// Decode a message payload
    pub fn parse(payload: &[u8]) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_slice(payload)?;
        if value.get("command").and_then(Value::as_str).is_none() {
            return Err(BridgeError::InvalidArguments(format!(
                "Command not recognised: {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Build the keyword arguments for an operation with the given parameters.
    ///
    /// A legacy `arg` binds to the operation's only parameter other than `pin`.
    pub fn resolve_kwargs(&self, params: &[&str]) -> Result<Kwargs, BridgeError> {
        if let Some(kwargs) = &self.kwargs {
            return Ok(kwargs.clone());
        }
        let Some(arg) = &self.arg else {
            return Ok(Kwargs::new());
        };
        let positional: Vec<&str> = params
            .iter()
            .copied()
            .filter(|p| *p != PIN_PARAM)
            .collect();
        match positional.as_slice() {
            [single] => {
                let mut kwargs = Kwargs::new();
                kwargs.insert(single.to_string(), arg.clone());
                Ok(kwargs)
            }
            _ => Err(BridgeError::InvalidArguments(format!(
                "'{}' takes parameters ({}); send them in 'kwargs' instead of 'arg'",
                self.command,
                params.join(", ")
            ))),
        }
    }
}

/// Add the configured PIN when the operation takes one and none was supplied
pub fn merge_pin(kwargs: &mut Kwargs, params: &[&str], pin: Option<&str>) -> bool {
    match pin {
        Some(pin) if params.contains(&PIN_PARAM) && !kwargs.contains_key(PIN_PARAM) => {
            kwargs.insert(PIN_PARAM.to_string(), Value::String(pin.to_string()));
            true
        }
        _ => false,
    }
}
