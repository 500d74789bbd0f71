pub mod client;
pub mod topics;

use async_trait::async_trait;

use crate::errors::BridgeError;

/// Broker publish seam, mocked in tests
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError>;
}
