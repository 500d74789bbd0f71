//! Status poller: fetch from the vehicle API, publish to the broker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bridge::context::BridgeContext;
use crate::bridge::discovery;
use crate::models::status::{Position, VehicleStatus};
use crate::mqtt::topics::DEPARTURE_TIMER_SLOTS;
use crate::utils::timestamp_string;

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub published: usize,
    pub failed: usize,
}

impl PollReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.published += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct StatusPoller {
    ctx: Arc<BridgeContext>,
    discovery_initialised: AtomicBool,
}

impl StatusPoller {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            ctx,
            discovery_initialised: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Force discovery to be republished on the next cycle
    pub fn reset_discovery(&self) {
        self.discovery_initialised.store(false, Ordering::SeqCst);
    }

    pub fn discovery_initialised(&self) -> bool {
        self.discovery_initialised.load(Ordering::SeqCst)
    }

    /// Run a full poll cycle. Every step fails on its own; none aborts the cycle.
    pub async fn poll(&self) -> PollReport {
        debug!("Polling vehicle status...");
        let mut report = PollReport::default();

        let status = match self.ctx.api.get_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                error!("Failed to retrieve vehicle status: {}", e);
                report.failed += 1;
                None
            }
        };
        let position = match self.ctx.api.get_position().await {
            Ok(position) => position,
            Err(e) => {
                error!("Failed to retrieve vehicle position: {}", e);
                report.failed += 1;
                None
            }
        };

        if self.ctx.options.homeassistant_discovery && !self.discovery_initialised() {
            if let Some(status) = &status {
                let messages = discovery::build_messages(&self.ctx, &status.status, position.as_ref());
                let (published, failed) = discovery::publish_messages(&self.ctx, &messages).await;
                report.published += published;
                report.failed += failed;
                self.discovery_initialised.store(true, Ordering::SeqCst);
            } else {
                warn!("Skipping discovery until a status snapshot is available");
            }
        }

        if let Some(status) = &status {
            self.publish_status(status, &mut report).await;
            self.publish_alerts(status, &mut report).await;
        }
        if let Some(position) = &position {
            self.publish_position(position, &mut report).await;
        }
        self.publish_departure_timers(&mut report).await;

        let ok = self
            .ctx
            .publish(&self.ctx.topics.system("last_update_ts"), timestamp_string(), true)
            .await;
        report.record(ok);

        info!(
            "Poll complete: {} published, {} failed",
            report.published, report.failed
        );
        report
    }

    /// Fetch and publish a single status value (retained)
    pub async fn refresh_key(&self, key: &str) -> PollReport {
        let mut report = PollReport::default();
        match self.ctx.api.get_status_value(key).await {
            Ok(value) => {
                let ok = self
                    .ctx
                    .publish(&self.ctx.topics.status_item(key), value.to_payload(), true)
                    .await;
                report.record(ok);
            }
            Err(e) => {
                error!("Failed to retrieve status value {}: {}", key, e);
                report.failed += 1;
            }
        }
        report
    }

    async fn publish_status(&self, status: &VehicleStatus, report: &mut PollReport) {
        let sensors = self.ctx.sensors();
        for item in status.status.items.iter().filter(|i| sensors.allows(&i.name)) {
            let topic = self.ctx.topics.status_item(&item.name);
            let ok = self
                .ctx
                .publish(&topic, item.value.to_payload(), self.ctx.retain)
                .await;
            report.record(ok);
        }
    }

    async fn publish_alerts(&self, status: &VehicleStatus, report: &mut PollReport) {
        for alert in &status.alerts {
            for (property, value) in &alert.properties {
                let topic = self.ctx.topics.alert(&alert.key, property);
                let ok = self
                    .ctx
                    .publish(&topic, value.to_payload(), self.ctx.retain)
                    .await;
                report.record(ok);
            }
        }
    }

    async fn publish_position(&self, position: &Position, report: &mut PollReport) {
        for (field, value) in &position.fields {
            let ok = self
                .ctx
                .publish(&self.ctx.topics.position(field), value.to_payload(), true)
                .await;
            report.record(ok);
        }

        if !self.ctx.options.reverse_geocode {
            return;
        }
        let Some((latitude, longitude)) = position.coordinates() else {
            return;
        };
        let address = match self.ctx.api.reverse_geocode(&latitude, &longitude).await {
            Ok(address) => address,
            Err(e) => {
                error!("Reverse geocode failed: {}", e);
                report.failed += 1;
                return;
            }
        };
        // formattedAddress also goes to the parent topic, where discovery expects it
        if let Some(formatted) = address.get("formattedAddress") {
            let ok = self
                .ctx
                .publish(&self.ctx.topics.position("formatted_address"), address_payload(formatted), true)
                .await;
            report.record(ok);
        }
        for (field, value) in &address {
            let ok = self
                .ctx
                .publish(&self.ctx.topics.position_address(field), address_payload(value), true)
                .await;
            report.record(ok);
        }
    }

    async fn publish_departure_timers(&self, report: &mut PollReport) {
        let timers = match self.ctx.api.get_departure_timers().await {
            Ok(timers) => timers,
            Err(e) => {
                error!("Failed to retrieve departure timers: {}", e);
                report.failed += 1;
                return;
            }
        };

        for slot in 0..DEPARTURE_TIMER_SLOTS {
            let topic = self.ctx.topics.departure_timer(&slot.to_string());
            let ok = self.ctx.publish(&topic, "", self.ctx.retain).await;
            report.record(ok);
        }

        if timers.is_empty() {
            let ok = self
                .ctx
                .publish(&self.ctx.topics.departure_timers(), "[]", self.ctx.retain)
                .await;
            report.record(ok);
            return;
        }
        for timer in &timers {
            let index = match timer.get("timerIndex") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => {
                    warn!("Departure timer without timerIndex: {}", timer);
                    continue;
                }
            };
            let ok = self
                .ctx
                .publish(
                    &self.ctx.topics.departure_timer(&index),
                    timer.to_string(),
                    self.ctx.retain,
                )
                .await;
            report.record(ok);
        }
    }
}

fn address_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
