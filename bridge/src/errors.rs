//! Bridge error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("I/O failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Transport failure talking to InControl
    #[error("InControl request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Login rejected or session expired (HTTP 401/403); the session is dropped
    #[error("InControl authentication failed: {0}")]
    AuthError(String),

    /// HTTP 429
    #[error("InControl rate limit hit: {0}")]
    RateLimited(String),

    /// Any other non-success response from InControl
    #[error("InControl error: {0}")]
    ApiError(String),

    #[error("No such vehicle operation: {0}")]
    UnknownOperation(String),

    /// Command arguments the operation cannot accept
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("MQTT client error: {0}")]
    MqttError(String),

    /// Bad or missing settings; fatal at startup
    #[error("Invalid settings: {0}")]
    ConfigError(String),

    #[error("Shutdown failed: {0}")]
    ShutdownError(String),

    /// A status key or vehicle the account does not have
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(e: rumqttc::ClientError) -> Self {
        BridgeError::MqttError(e.to_string())
    }
}

impl BridgeError {
    /// Whether the error means the remote session is no longer usable
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::AuthError(_))
    }
}
