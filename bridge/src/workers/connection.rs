//! Broker connection driver: owns the rumqttc event loop

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::mqtt::client::MqttMessage;
use crate::mqtt::topics::Topics;
use crate::utils::{timestamp_string, Backoff};

/// Connection driver options
#[derive(Debug, Clone)]
pub struct Options {
    /// Backoff applied after each consecutive connection error
    pub backoff: Backoff,

    /// How long to keep driving the event loop so `offline` reaches the broker
    pub drain_timeout: Duration,

    pub qos: QoS,

    pub version: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            drain_timeout: Duration::from_secs(2),
            qos: QoS::AtMostOnce,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Run the connection driver until shutdown.
///
/// Inbound publishes on the command topic are handed to the bridge worker
/// through `inbound_tx`; when the channel is full the message is dropped.
pub async fn run<S, F>(
    options: &Options,
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    inbound_tx: mpsc::Sender<MqttMessage>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Connection worker starting...");

    let mut attempt: u32 = 0;
    // Requests the full request queue refused after the last ConnAck
    let mut pending: Option<Announcement> = None;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Connection worker shutting down...");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(event) => {
                    match event {
                        Event::Incoming(Packet::ConnAck(_)) => {
                            info!("MQTT connected");
                            attempt = 0;
                            pending = Some(Announcement::new(options, &topics));
                        }
                        Event::Incoming(Packet::Publish(publish)) => {
                            let message = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                            };
                            forward(&topics, &inbound_tx, message);
                        }
                        Event::Incoming(Packet::SubAck(_)) => {
                            debug!("Subscription acknowledged");
                        }
                        _ => {}
                    }
                    // Each polled event frees a slot in the request queue
                    if let Some(announcement) = pending.as_mut() {
                        if announcement.flush(&client) {
                            pending = None;
                        }
                    }
                }
                Err(e) => {
                    let wait = options.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!("MQTT connection error: {}, retrying in {:?}", e, wait);
                    let mut stop = false;
                    tokio::select! {
                        _ = &mut shutdown_signal => stop = true,
                        _ = sleep_fn(wait) => {}
                    }
                    if stop {
                        info!("Connection worker shutting down...");
                        break;
                    }
                }
            }
        }
    }

    go_offline(options, &client, &mut eventloop, &topics).await;
}

enum Request {
    Subscribe(String),
    Publish(String, String),
}

/// Subscription and availability requests sent on every ConnAck.
///
/// Requests leave the queue only once rumqttc accepts them, so a request
/// queue still full of publishes from an outage delays them rather than
/// dropping them.
struct Announcement {
    qos: QoS,
    requests: VecDeque<Request>,
    deferred: bool,
}

impl Announcement {
    fn new(options: &Options, topics: &Topics) -> Self {
        let config = json!({"version": options.version}).to_string();
        let requests = VecDeque::from([
            Request::Subscribe(topics.command().to_string()),
            Request::Publish(topics.state(), "online".to_string()),
            Request::Publish(topics.config(), config),
            Request::Publish(topics.system_state_updated(), timestamp_string()),
        ]);
        Self {
            qos: options.qos,
            requests,
            deferred: false,
        }
    }

    /// Queue as many requests as the client accepts, in order. True once all are queued.
    fn flush(&mut self, client: &AsyncClient) -> bool {
        while let Some(request) = self.requests.front() {
            let result = match request {
                Request::Subscribe(topic) => client.try_subscribe(topic, self.qos),
                Request::Publish(topic, payload) => {
                    client.try_publish(topic, self.qos, true, payload.clone())
                }
            };
            if let Err(e) = result {
                if !self.deferred {
                    warn!("MQTT request queue busy ({}), deferring subscription and availability", e);
                    self.deferred = true;
                }
                return false;
            }
            if let Some(Request::Subscribe(topic)) = self.requests.pop_front() {
                info!("Subscribed to: {}", topic);
            }
        }
        true
    }
}

/// Hand a command message to the bridge worker without blocking the event loop
pub fn forward(topics: &Topics, inbound_tx: &mpsc::Sender<MqttMessage>, message: MqttMessage) -> bool {
    if !topics.is_command_topic(&message.topic) {
        debug!("Ignoring message on {}", message.topic);
        return false;
    }
    match inbound_tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!("Command queue full, dropping message on {}", message.topic);
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("Bridge worker has stopped, dropping command");
            false
        }
    }
}

async fn go_offline(options: &Options, client: &AsyncClient, eventloop: &mut EventLoop, topics: &Topics) {
    // Keep offering `offline` and the disconnect while the loop drains the queue
    let drain = async {
        let mut offline_queued = false;
        let mut disconnect_queued = false;
        loop {
            if !offline_queued {
                offline_queued = client
                    .try_publish(topics.state(), options.qos, true, "offline")
                    .is_ok();
            }
            if offline_queued && !disconnect_queued {
                disconnect_queued = client.try_disconnect().is_ok();
            }
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT event loop stopped: {}", e);
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(options.drain_timeout, drain).await.is_err() {
        warn!("Timed out flushing MQTT requests");
    }
    info!("MQTT disconnected");
}
