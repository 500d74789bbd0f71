//! MQTT topic definitions

use crate::models::status::category_of;

/// Node id used in discovery topics
pub const NODE_ID: &str = "jlr2mqtt";

/// Departure timer slots cleared before each publish
pub const DEPARTURE_TIMER_SLOTS: u32 = 10;

/// Topic layout below the configured publish root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
    command: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(
        pub_topic: impl Into<String>,
        sub_topic: impl Into<String>,
        discovery_prefix: impl Into<String>,
    ) -> Self {
        Self {
            base: pub_topic.into().trim_end_matches('/').to_string(),
            command: sub_topic.into().trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Inbound command topic
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Status item topic: `<base>/<category>/<key>`
    pub fn status_item(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base, category_of(key), key.to_lowercase())
    }

    /// Alert property topic
    pub fn alert(&self, key: &str, property: &str) -> String {
        format!(
            "{}/alerts/{}/{}/{}",
            self.base,
            category_of(key),
            key.to_lowercase(),
            property
        )
    }

    pub fn position(&self, field: &str) -> String {
        format!("{}/position/{}", self.base, field)
    }

    pub fn position_address(&self, field: &str) -> String {
        format!("{}/position/address/{}", self.base, field)
    }

    pub fn departure_timers(&self) -> String {
        format!("{}/departure_timers", self.base)
    }

    pub fn departure_timer(&self, index: &str) -> String {
        format!("{}/departure_timers/{}", self.base, index)
    }

    /// Bridge bookkeeping topic under `<base>/system`
    pub fn system(&self, name: &str) -> String {
        format!("{}/system/{}", self.base, name)
    }

    /// Availability topic (`online` / `offline`)
    pub fn state(&self) -> String {
        format!("{}/state", self.base)
    }

    /// Bridge version topic
    pub fn config(&self) -> String {
        format!("{}/config", self.base)
    }

    pub fn system_state_updated(&self) -> String {
        format!("{}/system_state_updated", self.base)
    }

    /// Discovery config topic: `<prefix>/<component>/jlr2mqtt_<object>/config`
    pub fn discovery(&self, component: &str, object_id: &str) -> String {
        format!(
            "{}/{}/{}_{}/config",
            self.discovery_prefix,
            component,
            NODE_ID,
            object_id.to_lowercase()
        )
    }

    /// Check if topic matches the command subscription (wildcards allowed)
    pub fn is_command_topic(&self, topic: &str) -> bool {
        filter_matches(&self.command, topic)
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match (part, levels.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (expected, Some(level)) if expected == level => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}
