//! Poll-translate-publish and subscribe-dispatch-invoke core

pub mod context;
pub mod discovery;
pub mod dispatcher;
pub mod poller;

pub use context::BridgeContext;
pub use dispatcher::{CommandDispatcher, Followup};
pub use poller::{PollReport, StatusPoller};
