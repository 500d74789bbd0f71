//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::client::JlrClient;
use crate::api::session::{Credentials, SessionManager};
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::bridge::{BridgeContext, CommandDispatcher, StatusPoller};
use crate::errors::BridgeError;
use crate::http::client::HttpClient;
use crate::logs::LogHandle;
use crate::mqtt::client::{connect, ConnectOptions, MqttMessage, MqttPublisher};
use crate::mqtt::topics::Topics;
use crate::storage::settings::Settings;
use crate::utils::new_device_id;
use crate::workers::{bridge, connection};

/// Run the bridge until the shutdown signal resolves
pub async fn run(
    version: String,
    settings: Settings,
    options: AppOptions,
    log_handle: Option<Arc<LogHandle>>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BridgeError> {
    info!("Initializing jlr2mqtt {}...", version);

    let mut shutdown_manager = ShutdownManager::new(options.lifecycle.clone());

    if let Err(e) = init(version, settings, &options, log_handle, &mut shutdown_manager).await {
        error!("Failed to start bridge: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: String,
    settings: Settings,
    options: &AppOptions,
    log_handle: Option<Arc<LogHandle>>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), BridgeError> {
    let topics = Topics::new(
        &settings.mqtt.pub_topic,
        &settings.mqtt.sub_topic,
        &settings.misc.discovery_prefix,
    );

    let api = init_api(&settings, options)?;

    let connect_options = ConnectOptions::from_settings(&settings.mqtt, topics.state())?;
    let (client, eventloop) = connect(&connect_options)?;
    let publisher = Arc::new(MqttPublisher::new(client.clone(), connect_options.qos));

    let ctx = Arc::new(BridgeContext {
        api,
        publisher,
        topics: topics.clone(),
        retain: settings.mqtt.retain,
        pin: settings.jlr.pin,
        options: settings.misc,
        version,
    });

    let (inbound_tx, inbound_rx) = mpsc::channel(options.command_queue_capacity);

    let connection_options = connection::Options {
        qos: connect_options.qos,
        ..options.connection_worker.clone()
    };
    init_connection_worker(
        connection_options,
        client,
        eventloop,
        topics,
        inbound_tx,
        shutdown_manager,
    )?;

    let poller = Arc::new(StatusPoller::new(ctx));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), log_handle));
    init_bridge_worker(
        options.bridge_worker.clone(),
        poller,
        dispatcher,
        inbound_rx,
        shutdown_manager,
    )?;

    Ok(())
}

fn init_api(settings: &Settings, options: &AppOptions) -> Result<Arc<JlrClient>, BridgeError> {
    let http_client = Arc::new(HttpClient::new(options.http_timeout)?);

    let device_id = match &settings.jlr.device_id {
        Some(device_id) if !device_id.is_empty() => device_id.clone(),
        _ => {
            let device_id = new_device_id();
            info!("No device_id configured, registering as {}", device_id);
            device_id
        }
    };
    let sessions = SessionManager::new(
        http_client.clone(),
        Credentials {
            username: settings.jlr.username.clone(),
            password: settings.jlr.password.clone(),
        },
        device_id,
    );

    Ok(Arc::new(JlrClient::new(
        http_client,
        sessions,
        settings.jlr.vin.clone(),
    )))
}

fn init_connection_worker(
    options: connection::Options,
    client: rumqttc::AsyncClient,
    eventloop: rumqttc::EventLoop,
    topics: Topics,
    inbound_tx: mpsc::Sender<MqttMessage>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), BridgeError> {
    info!("Initializing connection worker...");

    let mut shutdown_rx = shutdown_manager.connection_shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        connection::run(
            &options,
            client,
            eventloop,
            topics,
            inbound_tx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_connection_worker_handle(handle)
}

fn init_bridge_worker(
    options: bridge::Options,
    poller: Arc<StatusPoller>,
    dispatcher: Arc<CommandDispatcher>,
    inbound_rx: mpsc::Receiver<MqttMessage>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), BridgeError> {
    info!("Initializing bridge worker...");

    let mut shutdown_rx = shutdown_manager.bridge_shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        bridge::run(
            &options,
            poller,
            dispatcher,
            inbound_rx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_bridge_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

/// Stops the bridge worker before the connection so `offline` is the last publish
struct ShutdownManager {
    lifecycle_options: LifecycleOptions,
    bridge_shutdown_tx: broadcast::Sender<()>,
    connection_shutdown_tx: broadcast::Sender<()>,
    bridge_worker_handle: Option<JoinHandle<()>>,
    connection_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(lifecycle_options: LifecycleOptions) -> Self {
        let (bridge_shutdown_tx, _) = broadcast::channel(1);
        let (connection_shutdown_tx, _) = broadcast::channel(1);
        Self {
            lifecycle_options,
            bridge_shutdown_tx,
            connection_shutdown_tx,
            bridge_worker_handle: None,
            connection_worker_handle: None,
        }
    }

    pub fn with_bridge_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BridgeError> {
        if self.bridge_worker_handle.is_some() {
            return Err(BridgeError::ShutdownError("bridge_handle already set".to_string()));
        }
        self.bridge_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_connection_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), BridgeError> {
        if self.connection_worker_handle.is_some() {
            return Err(BridgeError::ShutdownError("connection_handle already set".to_string()));
        }
        self.connection_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BridgeError> {
        info!("Shutting down jlr2mqtt...");

        // 1. Bridge worker
        let _ = self.bridge_shutdown_tx.send(());
        if let Some(handle) = self.bridge_worker_handle.take() {
            handle.await.map_err(|e| BridgeError::ShutdownError(e.to_string()))?;
        }

        // 2. Connection worker (publishes offline)
        let _ = self.connection_shutdown_tx.send(());
        if let Some(handle) = self.connection_worker_handle.take() {
            handle.await.map_err(|e| BridgeError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
