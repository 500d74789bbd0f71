//! Command dispatcher: decode a command message and invoke the named operation

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::{Operation, OperationKind};
use crate::bridge::context::BridgeContext;
use crate::bridge::poller::StatusPoller;
use crate::errors::BridgeError;
use crate::logs::{LogHandle, LogLevel};
use crate::models::command::{merge_pin, CommandDescriptor, Kwargs};
use crate::utils::timestamp_string;

/// What the bridge loop should do once a command has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Refresh the full status after the delay
    RefreshAfter(Duration),
}

/// Commands handled by the bridge itself rather than the vehicle API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalCommand {
    GetStatus,
    InitDiscovery,
    SetLogLevel,
    RefreshLastCommandStatus,
}

impl InternalCommand {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "get_status" => Some(Self::GetStatus),
            "init_ha_discovery" => Some(Self::InitDiscovery),
            "set_log_level" => Some(Self::SetLogLevel),
            "refresh_last_command_status" => Some(Self::RefreshLastCommandStatus),
            _ => None,
        }
    }
}

pub struct CommandDispatcher {
    ctx: Arc<BridgeContext>,
    poller: Arc<StatusPoller>,
    log_handle: Option<Arc<LogHandle>>,
    last_service_id: Mutex<Option<String>>,
}

impl CommandDispatcher {
    pub fn new(poller: Arc<StatusPoller>, log_handle: Option<Arc<LogHandle>>) -> Self {
        Self {
            ctx: poller.context().clone(),
            poller,
            log_handle,
            last_service_id: Mutex::new(None),
        }
    }

    /// Last `customerServiceId` returned by a vehicle command
    pub async fn last_service_id(&self) -> Option<String> {
        self.last_service_id.lock().await.clone()
    }

    /// Handle one message from the command topic. Never fails; errors are logged.
    pub async fn handle(&self, payload: &[u8]) -> Followup {
        self.ctx
            .publish(&self.ctx.topics.system("send_command_ts"), timestamp_string(), true)
            .await;

        let descriptor = match CommandDescriptor::parse(payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(
                    "Command not recognised: {} ({})",
                    String::from_utf8_lossy(payload),
                    e
                );
                self.publish_outcome(&json!({"error": e.to_string()})).await;
                return Followup::None;
            }
        };
        info!("Command received: {}", descriptor.command);

        if let Some(internal) = InternalCommand::parse(&descriptor.command) {
            return self.handle_internal(internal, &descriptor).await;
        }

        let Some(operation) = self.ctx.api.operation(&descriptor.command) else {
            error!("Command not recognised: {}", descriptor.command);
            return Followup::None;
        };

        let mut kwargs = match descriptor.resolve_kwargs(operation.params) {
            Ok(kwargs) => kwargs,
            Err(e) => {
                error!("Unable to run {}: {}", operation.name, e);
                self.publish_error(&e).await;
                return Followup::None;
            }
        };
        if merge_pin(&mut kwargs, operation.params, self.ctx.pin()) {
            debug!("Configured PIN added to {}", operation.name);
        }

        let succeeded = self.invoke(operation, &kwargs).await;
        if succeeded && operation.kind == OperationKind::Service {
            let delay = Duration::from_secs(self.ctx.options.command_refresh_delay_secs);
            Followup::RefreshAfter(delay)
        } else {
            Followup::None
        }
    }

    async fn handle_internal(&self, command: InternalCommand, descriptor: &CommandDescriptor) -> Followup {
        match command {
            InternalCommand::GetStatus => match descriptor.key.as_deref() {
                Some(key) => {
                    self.poller.refresh_key(key).await;
                }
                None => {
                    self.poller.poll().await;
                }
            },
            InternalCommand::InitDiscovery => {
                info!("Reinitialising Home Assistant discovery");
                self.poller.reset_discovery();
                self.poller.poll().await;
            }
            InternalCommand::SetLogLevel => self.set_log_level(descriptor.level.as_deref()),
            InternalCommand::RefreshLastCommandStatus => {
                let Some(service_id) = self.last_service_id().await else {
                    warn!("No vehicle command has been sent yet");
                    return Followup::None;
                };
                let Some(operation) = self.ctx.api.operation("get_service_status") else {
                    error!("Command not recognised: get_service_status");
                    return Followup::None;
                };
                let mut kwargs = Kwargs::new();
                kwargs.insert("service_id".to_string(), Value::String(service_id));
                self.invoke(operation, &kwargs).await;
            }
        }
        Followup::None
    }

    fn set_log_level(&self, level: Option<&str>) {
        let Some(level) = level else {
            error!("set_log_level requires a 'level'");
            return;
        };
        let level = match level.parse::<LogLevel>() {
            Ok(level) => level,
            Err(e) => {
                error!("Invalid log level {}: {}", level, e);
                return;
            }
        };
        match &self.log_handle {
            Some(handle) => match handle.set_level(&level) {
                Ok(()) => info!("Log level set to {}", level.to_filter_string()),
                Err(e) => error!("Unable to change log level: {}", e),
            },
            None => warn!("Log level cannot be changed at runtime"),
        }
    }

    /// Call the remote operation and publish its outcome; true on success
    async fn invoke(&self, operation: &Operation, kwargs: &Kwargs) -> bool {
        match self.ctx.api.invoke(operation, kwargs).await {
            Ok(response) => {
                info!("{} completed", operation.name);
                self.publish_response(&response).await;
                true
            }
            Err(e) => {
                error!("{} failed: {}", operation.name, e);
                self.publish_error(&e).await;
                false
            }
        }
    }

    /// Publish the response and its timestamp
    async fn publish_outcome(&self, response: &Value) {
        let topics = &self.ctx.topics;
        self.ctx
            .publish(&topics.system("send_command_response"), response.to_string(), true)
            .await;
        self.ctx
            .publish(&topics.system("send_command_response_ts"), timestamp_string(), true)
            .await;
    }

    /// Publish a command outcome and record its service id, clearing any stale one
    async fn publish_response(&self, response: &Value) {
        self.publish_outcome(response).await;

        let service_id = response
            .get("customerServiceId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        self.ctx
            .publish(
                &self.ctx.topics.system("send_command_service_id"),
                service_id.unwrap_or_default(),
                true,
            )
            .await;
        *self.last_service_id.lock().await = service_id.map(str::to_string);
    }

    async fn publish_error(&self, e: &BridgeError) {
        self.publish_response(&json!({"error": e.to_string()})).await;
    }
}
