//! Data models

pub mod command;
pub mod discovery;
pub mod status;
