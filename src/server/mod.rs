//! WebSocket signaling server
//!
//! Accepts TCP connections, upgrades them to WebSocket and feeds every text
//! frame to the [`Coordinator`](crate::Coordinator).

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use listener::SignalingServer;
