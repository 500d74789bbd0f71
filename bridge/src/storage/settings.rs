//! Settings file management

use std::collections::BTreeSet;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::errors::BridgeError;
use crate::filesys::file::ConfigFile;
use crate::logs::LogLevel;

/// Bridge settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Remote API credentials
    pub jlr: JlrSettings,

    /// MQTT broker configuration
    pub mqtt: MqttSettings,

    /// Discovery and polling options
    #[serde(default)]
    pub misc: MiscSettings,
}

impl Settings {
    /// Load and validate the settings file
    pub async fn load(file: &ConfigFile) -> Result<Self, BridgeError> {
        let contents = file.read_string().await?;
        Self::from_json(&contents)
    }

    /// Parse and validate settings from a JSON document
    pub fn from_json(contents: &str) -> Result<Self, BridgeError> {
        let mut settings: Settings = serde_json::from_str(contents)
            .map_err(|e| BridgeError::ConfigError(format!("Malformed settings: {}", e)))?;
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    fn normalize(&mut self) {
        self.mqtt.sub_topic = self.mqtt.sub_topic.trim_end_matches('/').to_string();
        self.mqtt.pub_topic = self.mqtt.pub_topic.trim_end_matches('/').to_string();
    }

    /// Check the settings the bridge cannot start without
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.mqtt.host.is_empty() {
            return Err(BridgeError::ConfigError(
                "Unable to start as MQTT broker host is not defined".to_string(),
            ));
        }
        if self.mqtt.sub_topic.is_empty() {
            return Err(BridgeError::ConfigError("mqtt.sub_topic is empty".to_string()));
        }
        if self.mqtt.pub_topic.is_empty() {
            return Err(BridgeError::ConfigError("mqtt.pub_topic is empty".to_string()));
        }
        if self.jlr.username.is_empty() || self.jlr.password.expose_secret().is_empty() {
            return Err(BridgeError::ConfigError(
                "jlr.username and jlr.password are required".to_string(),
            ));
        }
        if !(0..=2).contains(&self.mqtt.qos) {
            return Err(BridgeError::ConfigError(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        Ok(())
    }
}

/// Remote API settings
#[derive(Debug, Deserialize)]
pub struct JlrSettings {
    /// InControl login (email address)
    #[serde(alias = "user_id")]
    pub username: String,

    /// InControl password
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,

    /// Vehicle PIN merged into commands that take one
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub pin: Option<SecretString>,

    /// Device id registered with the API; generated when absent
    #[serde(default)]
    pub device_id: Option<String>,

    /// VIN of the vehicle to bridge; the first vehicle when absent
    #[serde(default)]
    pub vin: Option<String>,
}

/// MQTT broker settings
#[derive(Debug, Deserialize)]
pub struct MqttSettings {
    /// Broker host
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub password: Option<SecretString>,

    /// Topic inbound commands arrive on
    pub sub_topic: String,

    /// Root of every published topic
    pub pub_topic: String,

    /// Retain flag for status publishes
    #[serde(default)]
    pub retain: bool,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default)]
    pub qos: u8,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "jlr2mqtt".to_string()
}

fn default_keepalive() -> u64 {
    60
}

/// Discovery and polling settings
#[derive(Debug, Clone, Deserialize)]
pub struct MiscSettings {
    /// Publish Home Assistant discovery descriptors
    #[serde(default)]
    pub homeassistant_discovery: bool,

    /// Status keys to publish and discover; everything when empty
    #[serde(default)]
    pub discovery_sensors_list: SensorList,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Device name shown in Home Assistant
    #[serde(default = "default_vehicle_name")]
    pub vehicle_name: String,

    /// Seconds between scheduled polls, 0 disables the timer
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after a vehicle command before refreshing status
    #[serde(default = "default_refresh_delay")]
    pub command_refresh_delay_secs: u64,

    /// Resolve the vehicle position to an address on each poll
    #[serde(default = "default_true")]
    pub reverse_geocode: bool,
}

fn default_true() -> bool {
    true
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_vehicle_name() -> String {
    "Range Rover".to_string()
}

fn default_poll_interval() -> u64 {
    600
}

fn default_refresh_delay() -> u64 {
    60
}

impl Default for MiscSettings {
    fn default() -> Self {
        Self {
            homeassistant_discovery: false,
            discovery_sensors_list: SensorList::default(),
            discovery_prefix: default_discovery_prefix(),
            vehicle_name: default_vehicle_name(),
            poll_interval_secs: default_poll_interval(),
            command_refresh_delay_secs: default_refresh_delay(),
            reverse_geocode: true,
        }
    }
}

/// Allow-list of status keys, stored lower-cased.
///
/// Accepts either a comma separated string (optionally wrapped in brackets)
/// or a JSON array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorList {
    keys: BTreeSet<String>,
}

impl SensorList {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| {
                k.as_ref()
                    .trim()
                    .trim_matches(|c| c == '[' || c == ']' || c == '"' || c == '\'')
                    .trim()
                    .to_lowercase()
            })
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    /// Parse a comma separated list
    pub fn parse(list: &str) -> Self {
        Self::new(list.split([',', '\n']))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a status key passes the filter (case-insensitive)
    pub fn allows(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.contains(&key.to_lowercase())
    }

    /// Whether an entry is explicitly named
    pub fn names(&self, entry: &str) -> bool {
        self.keys.contains(&entry.to_lowercase())
    }
}

impl<'de> Deserialize<'de> for SensorList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => SensorList::parse(&text),
            Raw::List(list) => SensorList::new(list),
        })
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(SecretString::from(s)),
        // PINs are often written as bare numbers
        Some(serde_json::Value::Number(n)) => Some(SecretString::from(n.to_string())),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string, got {}",
                other
            )))
        }
    })
}
