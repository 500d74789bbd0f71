//! MQTT client implementation

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::errors::BridgeError;
use crate::mqtt::Publisher;
use crate::storage::settings::MqttSettings;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
        }
    }
}

/// Everything needed to open the broker session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub address: MqttAddress,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keepalive: Duration,
    /// Topic that receives `offline` if the connection drops uncleanly
    pub will_topic: String,
    pub qos: QoS,
}

impl ConnectOptions {
    pub fn from_settings(settings: &MqttSettings, will_topic: String) -> Result<Self, BridgeError> {
        Ok(Self {
            address: MqttAddress {
                host: settings.host.clone(),
                port: settings.port,
                use_tls: settings.tls,
                ca_cert_path: settings.ca_cert_path.clone(),
            },
            client_id: settings.client_id.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            keepalive: Duration::from_secs(settings.keepalive_secs),
            will_topic,
            qos: qos_from_level(settings.qos)?,
        })
    }
}

/// Map a configured QoS level onto the rumqttc enum
pub fn qos_from_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::ConfigError(format!("Invalid MQTT qos {}", other))),
    }
}

/// Build the client handle and the event loop that drives it
pub fn connect(options: &ConnectOptions) -> Result<(AsyncClient, EventLoop), BridgeError> {
    let address = &options.address;
    if address.host.is_empty() {
        return Err(BridgeError::MqttError("MQTT host is not configured".to_string()));
    }

    let mut mqtt_options = MqttOptions::new(&options.client_id, &address.host, address.port);
    mqtt_options.set_keep_alive(options.keepalive);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_last_will(LastWill::new(
        &options.will_topic,
        "offline",
        options.qos,
        true,
    ));
    if let Some(username) = options.username.as_deref().filter(|u| !u.is_empty()) {
        let password = options
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    if address.use_tls {
        use rumqttc::{TlsConfiguration, Transport};
        use rustls::ClientConfig;
        use std::sync::Arc;

        let mut root_cert_store = rustls::RootCertStore::empty();

        if let Some(ref ca_path) = address.ca_cert_path {
            let ca_pem = std::fs::read(ca_path).map_err(|e| {
                BridgeError::MqttError(format!("Failed to read CA cert {ca_path}: {e}"))
            })?;
            let mut cursor = std::io::Cursor::new(ca_pem);
            for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                if let Err(e) = root_cert_store.add(cert) {
                    warn!("Skipping CA certificate from {}: {}", ca_path, e);
                }
            }
        } else {
            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    for cert in certs {
                        let _ = root_cert_store.add(cert);
                    }
                }
                Err(e) => warn!("Unable to load native certificates: {}", e),
            }
        }

        let client_config = ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(client_config),
        )));
    }

    info!(
        "MQTT client {} targeting {}:{} (tls: {})",
        options.client_id, address.host, address.port, address.use_tls
    );
    Ok(AsyncClient::new(mqtt_options, REQUEST_CAPACITY))
}

/// [`Publisher`] over a rumqttc client handle
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError> {
        self.client
            .publish(topic, self.qos, retain, payload.into_bytes())
            .await?;
        debug!("Published to: {}", topic);
        Ok(())
    }
}

/// Inbound MQTT message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}
