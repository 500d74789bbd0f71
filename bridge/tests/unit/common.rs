//! Shared mocks for the bridge tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use jlr2mqtt::api::operations;
use jlr2mqtt::api::{Operation, VehicleApi};
use jlr2mqtt::bridge::BridgeContext;
use jlr2mqtt::errors::BridgeError;
use jlr2mqtt::models::command::Kwargs;
use jlr2mqtt::models::status::{Position, StatusSnapshot, StatusValue, VehicleStatus};
use jlr2mqtt::mqtt::topics::Topics;
use jlr2mqtt::mqtt::Publisher;
use jlr2mqtt::storage::settings::MiscSettings;

// ================================ VEHICLE API ===================================== //

#[derive(Default)]
pub struct MockApi {
    pub status: Mutex<VehicleStatus>,
    pub position: Mutex<Option<Position>>,
    pub timers: Mutex<Vec<Value>>,
    pub address: Mutex<Map<String, Value>>,
    pub fail_status: bool,
    pub fail_invoke: bool,
    pub invoke_response: Mutex<Value>,
    pub status_calls: AtomicUsize,
    pub status_value_calls: Mutex<Vec<String>>,
    pub invocations: Mutex<Vec<(String, Kwargs)>>,
}

impl MockApi {
    pub fn with_status(items: Value) -> Self {
        let api = Self::default();
        *api.status.lock().unwrap() = VehicleStatus {
            status: StatusSnapshot::from_map(items.as_object().unwrap()),
            alerts: Vec::new(),
        };
        api
    }

    pub fn invocations(&self) -> Vec<(String, Kwargs)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleApi for MockApi {
    async fn get_status(&self) -> Result<VehicleStatus, BridgeError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status {
            return Err(BridgeError::ApiError("500: status unavailable".into()));
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_status_value(&self, key: &str) -> Result<StatusValue, BridgeError> {
        self.status_value_calls.lock().unwrap().push(key.to_string());
        self.status
            .lock()
            .unwrap()
            .status
            .get(key)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(key.to_string()))
    }

    async fn get_position(&self) -> Result<Option<Position>, BridgeError> {
        Ok(self.position.lock().unwrap().clone())
    }

    async fn get_departure_timers(&self) -> Result<Vec<Value>, BridgeError> {
        Ok(self.timers.lock().unwrap().clone())
    }

    async fn reverse_geocode(
        &self,
        _latitude: &str,
        _longitude: &str,
    ) -> Result<Map<String, Value>, BridgeError> {
        Ok(self.address.lock().unwrap().clone())
    }

    fn operation(&self, name: &str) -> Option<&'static Operation> {
        operations::find(name)
    }

    async fn invoke(&self, operation: &Operation, kwargs: &Kwargs) -> Result<Value, BridgeError> {
        self.invocations
            .lock()
            .unwrap()
            .push((operation.name.to_string(), kwargs.clone()));
        if self.fail_invoke {
            return Err(BridgeError::ApiError("503: vehicle unreachable".into()));
        }
        Ok(self.invoke_response.lock().unwrap().clone())
    }
}

// ================================= PUBLISHER ===================================== //

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
pub struct MockPublisher {
    pub messages: Mutex<Vec<Published>>,
    pub failing_topics: HashSet<String>,
}

impl MockPublisher {
    pub fn failing(topics: &[&str]) -> Self {
        Self {
            failing_topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.lock().unwrap().clone()
    }

    /// Last payload published to a topic
    pub fn payload(&self, topic: &str) -> Option<String> {
        self.messages()
            .into_iter()
            .rev()
            .find(|m| m.topic == topic)
            .map(|m| m.payload)
    }

    pub fn count(&self, topic: &str) -> usize {
        self.messages().iter().filter(|m| m.topic == topic).count()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<Published> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError> {
        if self.failing_topics.contains(topic) {
            return Err(BridgeError::MqttError("request channel closed".into()));
        }
        self.messages.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }
}

/// Publisher whose requests never complete, like a client stuck on a full queue
#[derive(Default)]
pub struct StalledPublisher;

#[async_trait]
impl Publisher for StalledPublisher {
    async fn publish(&self, _topic: &str, _payload: String, _retain: bool) -> Result<(), BridgeError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

// ================================== CONTEXT ====================================== //

pub const PUB_TOPIC: &str = "jlr2mqtt";
pub const SUB_TOPIC: &str = "jlr2mqtt/command";

pub fn context(
    api: Arc<MockApi>,
    publisher: Arc<dyn Publisher>,
    options: MiscSettings,
    pin: Option<&str>,
) -> Arc<BridgeContext> {
    Arc::new(BridgeContext {
        api,
        publisher,
        topics: Topics::new(PUB_TOPIC, SUB_TOPIC, &options.discovery_prefix),
        retain: false,
        pin: pin.map(|p| SecretString::from(p.to_string())),
        options,
        version: "0.8.3".to_string(),
    })
}

/// Options with timers and reverse geocoding off
pub fn quiet_options() -> MiscSettings {
    MiscSettings {
        reverse_geocode: false,
        ..Default::default()
    }
}

pub fn sample_status() -> Value {
    json!({"ev_state_of_charge": 80, "door_is_all_doors_locked": true})
}

// ================================== LOGGING ====================================== //

/// Counts ERROR events seen while installed
#[derive(Clone, Default)]
pub struct ErrorCounter {
    count: Arc<AtomicUsize>,
}

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Install an error counter for the current thread
pub fn count_errors() -> (ErrorCounter, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let counter = ErrorCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (counter, guard)
}
