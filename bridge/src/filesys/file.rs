//! Settings file access

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;

use crate::errors::BridgeError;

/// The JSON settings file on disk
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the file as UTF-8. Read failures are configuration errors naming the path.
    pub async fn read_string(&self) -> Result<String, BridgeError> {
        fs::read_to_string(&self.path).await.map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::NotFound => "does not exist".to_string(),
                _ => format!("cannot be read: {}", e),
            };
            BridgeError::ConfigError(format!(
                "Settings file {} {}",
                self.path.display(),
                reason
            ))
        })
    }
}
