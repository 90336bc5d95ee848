//! Relay error types

use thiserror::Error;

/// Failure reported by the media relay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("pipeline creation failed: {0}")]
    CreatePipeline(String),

    #[error("endpoint creation failed: {0}")]
    CreateEndpoint(String),

    #[error("network traversal configuration failed: {0}")]
    Configure(String),

    /// Malformed offer or offer refused by the relay
    #[error("offer rejected: {0}")]
    ProcessOffer(String),

    #[error("candidate gathering failed: {0}")]
    GatherCandidates(String),

    #[error("adding ICE candidate failed: {0}")]
    AddIceCandidate(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("release failed: {0}")]
    Release(String),

    /// Relay could not be reached at all
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}
