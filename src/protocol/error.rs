//! Protocol error types

use thiserror::Error;

/// Reasons an inbound message is rejected before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not a JSON object with a string `type`
    #[error("malformed message: {0}")]
    MalformedJson(String),

    /// `type` is not one of the known inbound messages
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// `roomId` missing or empty
    #[error("no roomId")]
    MissingRoomId,

    /// `role` is neither `caller` nor `callee`
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// `sdp` missing or empty
    #[error("missing sdp")]
    MissingSdp,
}
