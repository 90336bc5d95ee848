//! Media relay abstraction
//!
//! The coordinator never touches media. Pipelines, endpoints, SDP processing
//! and ICE all happen in an external media relay (an SFU / media server);
//! this module defines the operations the coordinator needs from it.
//!
//! Handles are opaque identifiers minted by the relay. Release is expected
//! to be idempotent on the relay side, but the coordinator also guarantees
//! it never releases the same handle twice.

pub mod config;
pub mod error;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::IceCandidate;

pub use config::{NetworkTraversal, TraversalConfig};
pub use error::RelayError;

/// Relay-side media pipeline shared by both endpoints of a room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineHandle(String);

impl PipelineHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relay-side endpoint carrying one participant's media
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointHandle(String);

impl EndpointHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asynchronous event raised by the relay for one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// A local candidate was gathered and must reach the endpoint's peer
    IceCandidateFound(IceCandidate),
    /// Media flow state changed (informational)
    MediaStateChanged(String),
    /// ICE/DTLS connection state changed (informational)
    ConnectionStateChanged(String),
}

/// Per-endpoint event stream, in the order the relay emits them
pub type EndpointEvents = mpsc::UnboundedReceiver<EndpointEvent>;

/// Operations consumed from the external media relay
///
/// Every call may suspend on a relay round-trip; implementations must not
/// block the runtime while waiting.
#[async_trait]
pub trait MediaRelay: Send + Sync + 'static {
    /// Create a media pipeline
    async fn create_pipeline(&self) -> Result<PipelineHandle, RelayError>;

    /// Create a WebRTC endpoint inside `pipeline`
    ///
    /// The returned receiver yields the endpoint's events for as long as the
    /// endpoint lives.
    async fn create_endpoint(
        &self,
        pipeline: &PipelineHandle,
    ) -> Result<(EndpointHandle, EndpointEvents), RelayError>;

    /// Apply STUN/TURN settings; absent fields are left untouched
    async fn configure_network_traversal(
        &self,
        endpoint: &EndpointHandle,
        traversal: &NetworkTraversal,
    ) -> Result<(), RelayError>;

    /// Process an SDP offer and return the SDP answer
    async fn process_offer(&self, endpoint: &EndpointHandle, offer: &str) -> Result<String, RelayError>;

    /// Start candidate gathering; candidates arrive later as events
    async fn gather_candidates(&self, endpoint: &EndpointHandle) -> Result<(), RelayError>;

    /// Hand a remote candidate to the endpoint
    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointHandle,
        candidate: &IceCandidate,
    ) -> Result<(), RelayError>;

    /// Route media from `from` into `to` (one direction only)
    async fn connect(&self, from: &EndpointHandle, to: &EndpointHandle) -> Result<(), RelayError>;

    /// Release an endpoint; releasing an unknown or released endpoint is a no-op
    async fn release_endpoint(&self, endpoint: &EndpointHandle) -> Result<(), RelayError>;

    /// Release a pipeline; releasing an unknown or released pipeline is a no-op
    async fn release_pipeline(&self, pipeline: &PipelineHandle) -> Result<(), RelayError>;
}
