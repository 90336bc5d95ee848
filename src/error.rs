//! Crate-wide error type

use thiserror::Error;

use crate::protocol::{ConnectionId, ProtocolError, RoomId};
use crate::relay::RelayError;

/// Error type for coordinator and server operations
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The shared pipeline for a room could not be created
    #[error("pipeline creation failed for room {0}")]
    PipelineCreationFailed(RoomId),

    /// The media relay rejected an operation
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// An inbound message was invalid
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection went away while an operation was in flight
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result alias using [`SignalingError`]
pub type Result<T> = std::result::Result<T, SignalingError>;
