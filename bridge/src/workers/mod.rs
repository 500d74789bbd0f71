pub mod bridge;
pub mod connection;
