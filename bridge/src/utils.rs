//! Small helpers shared by the workers

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

/// Build metadata reported by `--version`
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Broker reconnect delay, doubling per consecutive failure up to `ceiling`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            ceiling: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive errors
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.ceiling)
    }
}

/// UTC time as published on the `*_ts` topics, e.g. `2024-03-01T10:00:00Z`
pub fn timestamp_string() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Fresh device id for IFOP registration when none is configured
pub fn new_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
