//! jlr2mqtt Library
//!
//! Core modules for the JLR InControl to MQTT bridge.

pub mod api;
pub mod app;
pub mod bridge;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod storage;
pub mod utils;
pub mod workers;
