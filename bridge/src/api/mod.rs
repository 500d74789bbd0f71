//! Remote vehicle API
//!
//! [`VehicleApi`] is the seam the bridge talks to; [`client::JlrClient`] is the
//! InControl implementation.

pub mod client;
pub mod endpoints;
pub mod operations;
pub mod session;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::BridgeError;
use crate::models::command::Kwargs;
use crate::models::status::{Position, StatusValue, VehicleStatus};

pub use operations::{Operation, OperationKind};

/// Remote vehicle API trait for testability
#[async_trait]
pub trait VehicleApi: Send + Sync {
    /// Fetch the full status snapshot and alerts
    async fn get_status(&self) -> Result<VehicleStatus, BridgeError>;

    /// Fetch a single status value
    async fn get_status_value(&self, key: &str) -> Result<StatusValue, BridgeError>;

    /// Last reported position, if the vehicle shares one
    async fn get_position(&self) -> Result<Option<Position>, BridgeError>;

    /// Configured departure timers
    async fn get_departure_timers(&self) -> Result<Vec<Value>, BridgeError>;

    /// Resolve coordinates to an address
    async fn reverse_geocode(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<Map<String, Value>, BridgeError>;

    /// Look up a named operation
    fn operation(&self, name: &str) -> Option<&'static Operation>;

    /// Invoke a named operation with keyword arguments
    async fn invoke(&self, operation: &Operation, kwargs: &Kwargs) -> Result<Value, BridgeError>;
}
