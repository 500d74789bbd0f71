//! Shared handles for the poller and dispatcher

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::error;

use crate::api::VehicleApi;
use crate::errors::BridgeError;
use crate::mqtt::topics::Topics;
use crate::mqtt::Publisher;
use crate::storage::settings::{MiscSettings, SensorList};

/// API client, broker handle and the options both sides read
pub struct BridgeContext {
    pub api: Arc<dyn VehicleApi>,
    pub publisher: Arc<dyn Publisher>,
    pub topics: Topics,
    /// Retain flag for status and alert publishes
    pub retain: bool,
    pub pin: Option<SecretString>,
    pub options: MiscSettings,
    pub version: String,
}

impl BridgeContext {
    pub fn sensors(&self) -> &SensorList {
        &self.options.discovery_sensors_list
    }

    pub fn pin(&self) -> Option<&str> {
        self.pin.as_ref().map(|pin| pin.expose_secret())
    }

    /// Publish and log a failure instead of returning it
    pub async fn publish(&self, topic: &str, payload: impl Into<String>, retain: bool) -> bool {
        match self.try_publish(topic, payload, retain).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to publish to {}: {}", topic, e);
                false
            }
        }
    }

    pub async fn try_publish(
        &self,
        topic: &str,
        payload: impl Into<String>,
        retain: bool,
    ) -> Result<(), BridgeError> {
        self.publisher.publish(topic, payload.into(), retain).await
    }
}
