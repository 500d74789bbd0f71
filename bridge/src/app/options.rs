//! Application configuration options

use std::time::Duration;

use crate::storage::settings::Settings;
use crate::workers::{bridge, connection};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Timeout for each remote API request
    pub http_timeout: Duration,

    /// Inbound commands buffered between the connection and bridge workers
    pub command_queue_capacity: usize,

    /// Bridge worker options
    pub bridge_worker: bridge::Options,

    /// Connection worker options
    pub connection_worker: connection::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            http_timeout: Duration::from_secs(30),
            command_queue_capacity: 32,
            bridge_worker: bridge::Options::default(),
            connection_worker: connection::Options::default(),
        }
    }
}

impl AppOptions {
    /// Options derived from the settings file
    pub fn from_settings(settings: &Settings, version: &str) -> Self {
        let defaults = Self::default();
        Self {
            bridge_worker: bridge::Options::from_secs(settings.misc.poll_interval_secs),
            connection_worker: connection::Options {
                version: version.to_string(),
                ..defaults.connection_worker
            },
            ..defaults
        }
    }
}

/// Lifecycle options for the bridge
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
