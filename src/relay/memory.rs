//! In-process media relay
//!
//! Keeps pipelines and endpoints in memory, answers offers with a synthetic
//! SDP and emits synthetic host candidates when gathering starts. Every call
//! is counted and any operation can be made to fail, so this is the relay
//! the tests and the demo server run against.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{
    EndpointEvent, EndpointEvents, EndpointHandle, MediaRelay, NetworkTraversal, PipelineHandle,
    RelayError,
};
use crate::protocol::IceCandidate;

/// Relay operation, used to script failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayOp {
    CreatePipeline,
    CreateEndpoint,
    Configure,
    ProcessOffer,
    GatherCandidates,
    AddIceCandidate,
    Connect,
    Release,
}

/// Call counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayCalls {
    pub create_pipeline: usize,
    pub create_endpoint: usize,
    pub configure: usize,
    pub process_offer: usize,
    pub gather_candidates: usize,
    pub add_ice_candidate: usize,
    pub connect: usize,
    pub release_pipeline: usize,
    pub release_endpoint: usize,
    /// Releases of a handle that was already released
    pub double_release: usize,
}

struct EndpointRecord {
    pipeline: PipelineHandle,
    events: Option<mpsc::UnboundedSender<EndpointEvent>>,
    traversal: Option<NetworkTraversal>,
    remote_candidates: Vec<IceCandidate>,
    gathered: usize,
    released: bool,
}

#[derive(Default)]
struct RelayState {
    /// Pipeline handle -> released
    pipelines: HashMap<PipelineHandle, bool>,
    endpoints: HashMap<EndpointHandle, EndpointRecord>,
    links: HashSet<(EndpointHandle, EndpointHandle)>,
    failing: HashSet<RelayOp>,
    calls: RelayCalls,
}

impl RelayState {
    fn check(&self, op: RelayOp) -> Result<(), String> {
        if self.failing.contains(&op) {
            Err(format!("{:?} failure injected", op))
        } else {
            Ok(())
        }
    }

    fn live_endpoint(&mut self, endpoint: &EndpointHandle) -> Option<&mut EndpointRecord> {
        self.endpoints.get_mut(endpoint).filter(|record| !record.released)
    }
}

/// In-memory [`MediaRelay`]
pub struct MemoryRelay {
    state: Mutex<RelayState>,
    next_id: AtomicU64,
    latency: Duration,
    candidates_per_gather: usize,
}

impl MemoryRelay {
    /// Create a relay with no latency that emits two candidates per gather
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            next_id: AtomicU64::new(1),
            latency: Duration::ZERO,
            candidates_per_gather: 2,
        }
    }

    /// Delay every create/offer/connect call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of candidates emitted per `gather_candidates` call
    pub fn candidates_per_gather(mut self, count: usize) -> Self {
        self.candidates_per_gather = count;
        self
    }

    /// Make `op` fail until [`recover`](Self::recover) is called
    pub async fn fail(&self, op: RelayOp) {
        self.state.lock().await.failing.insert(op);
    }

    /// Stop failing `op`
    pub async fn recover(&self, op: RelayOp) {
        self.state.lock().await.failing.remove(&op);
    }

    /// Snapshot of the call counters
    pub async fn calls(&self) -> RelayCalls {
        self.state.lock().await.calls.clone()
    }

    /// Pipelines created and not yet released
    pub async fn live_pipelines(&self) -> usize {
        let state = self.state.lock().await;
        state.pipelines.values().filter(|released| !**released).count()
    }

    /// Endpoints created and not yet released
    pub async fn live_endpoints(&self) -> usize {
        let state = self.state.lock().await;
        state.endpoints.values().filter(|record| !record.released).count()
    }

    /// All endpoints ever created in `pipeline`
    pub async fn endpoints_in(&self, pipeline: &PipelineHandle) -> Vec<EndpointHandle> {
        let state = self.state.lock().await;
        let mut endpoints: Vec<EndpointHandle> = state
            .endpoints
            .iter()
            .filter(|(_, record)| &record.pipeline == pipeline)
            .map(|(handle, _)| handle.clone())
            .collect();
        endpoints.sort_by(|a, b| a.id().cmp(b.id()));
        endpoints
    }

    /// Whether media is routed from `from` into `to`
    pub async fn is_linked(&self, from: &EndpointHandle, to: &EndpointHandle) -> bool {
        self.state
            .lock()
            .await
            .links
            .contains(&(from.clone(), to.clone()))
    }

    /// Remote candidates handed to `endpoint`, in arrival order
    pub async fn remote_candidates(&self, endpoint: &EndpointHandle) -> Vec<IceCandidate> {
        self.state
            .lock()
            .await
            .endpoints
            .get(endpoint)
            .map(|record| record.remote_candidates.clone())
            .unwrap_or_default()
    }

    /// Traversal settings applied to `endpoint`
    pub async fn traversal(&self, endpoint: &EndpointHandle) -> Option<NetworkTraversal> {
        self.state
            .lock()
            .await
            .endpoints
            .get(endpoint)
            .and_then(|record| record.traversal.clone())
    }

    /// Raise an event on `endpoint` as the relay would
    ///
    /// Returns false if the endpoint is unknown or released.
    pub async fn emit(&self, endpoint: &EndpointHandle, event: EndpointEvent) -> bool {
        let mut state = self.state.lock().await;
        match state.live_endpoint(endpoint).and_then(|record| record.events.as_ref()) {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaRelay for MemoryRelay {
    async fn create_pipeline(&self) -> Result<PipelineHandle, RelayError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.create_pipeline += 1;
        state.check(RelayOp::CreatePipeline).map_err(RelayError::CreatePipeline)?;

        let pipeline = PipelineHandle::new(self.next_id("pipeline"));
        state.pipelines.insert(pipeline.clone(), false);
        Ok(pipeline)
    }

    async fn create_endpoint(
        &self,
        pipeline: &PipelineHandle,
    ) -> Result<(EndpointHandle, EndpointEvents), RelayError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.create_endpoint += 1;
        state.check(RelayOp::CreateEndpoint).map_err(RelayError::CreateEndpoint)?;

        if state.pipelines.get(pipeline) != Some(&false) {
            return Err(RelayError::CreateEndpoint(format!("no live pipeline {}", pipeline)));
        }

        let endpoint = EndpointHandle::new(self.next_id("endpoint"));
        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(
            endpoint.clone(),
            EndpointRecord {
                pipeline: pipeline.clone(),
                events: Some(tx),
                traversal: None,
                remote_candidates: Vec::new(),
                gathered: 0,
                released: false,
            },
        );
        Ok((endpoint, rx))
    }

    async fn configure_network_traversal(
        &self,
        endpoint: &EndpointHandle,
        traversal: &NetworkTraversal,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.calls.configure += 1;
        state.check(RelayOp::Configure).map_err(RelayError::Configure)?;

        let record = state
            .live_endpoint(endpoint)
            .ok_or_else(|| RelayError::Configure(format!("no live endpoint {}", endpoint)))?;
        record.traversal = Some(traversal.clone());
        Ok(())
    }

    async fn process_offer(&self, endpoint: &EndpointHandle, offer: &str) -> Result<String, RelayError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.process_offer += 1;
        state.check(RelayOp::ProcessOffer).map_err(RelayError::ProcessOffer)?;

        if !offer.starts_with("v=0") {
            return Err(RelayError::ProcessOffer("malformed offer".into()));
        }
        if state.live_endpoint(endpoint).is_none() {
            return Err(RelayError::ProcessOffer(format!("no live endpoint {}", endpoint)));
        }

        Ok(format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\na=answer\r\n",
            endpoint
        ))
    }

    async fn gather_candidates(&self, endpoint: &EndpointHandle) -> Result<(), RelayError> {
        let count = self.candidates_per_gather;
        let mut state = self.state.lock().await;
        state.calls.gather_candidates += 1;
        state
            .check(RelayOp::GatherCandidates)
            .map_err(RelayError::GatherCandidates)?;

        let record = state
            .live_endpoint(endpoint)
            .ok_or_else(|| RelayError::GatherCandidates(format!("no live endpoint {}", endpoint)))?;

        for _ in 0..count {
            record.gathered += 1;
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host ufrag {}",
                    record.gathered,
                    40000 + record.gathered,
                    endpoint
                ),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            };
            if let Some(events) = &record.events {
                let _ = events.send(EndpointEvent::IceCandidateFound(candidate));
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointHandle,
        candidate: &IceCandidate,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.calls.add_ice_candidate += 1;
        state
            .check(RelayOp::AddIceCandidate)
            .map_err(RelayError::AddIceCandidate)?;

        let record = state
            .live_endpoint(endpoint)
            .ok_or_else(|| RelayError::AddIceCandidate(format!("no live endpoint {}", endpoint)))?;
        record.remote_candidates.push(candidate.clone());
        Ok(())
    }

    async fn connect(&self, from: &EndpointHandle, to: &EndpointHandle) -> Result<(), RelayError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.connect += 1;
        state.check(RelayOp::Connect).map_err(RelayError::Connect)?;

        if state.live_endpoint(from).is_none() || state.live_endpoint(to).is_none() {
            return Err(RelayError::Connect(format!("cannot connect {} -> {}", from, to)));
        }
        state.links.insert((from.clone(), to.clone()));
        Ok(())
    }

    async fn release_endpoint(&self, endpoint: &EndpointHandle) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.calls.release_endpoint += 1;
        state.check(RelayOp::Release).map_err(RelayError::Release)?;

        let already_released = match state.endpoints.get_mut(endpoint) {
            Some(record) if record.released => true,
            Some(record) => {
                record.released = true;
                // Closing the sender ends the coordinator's forwarder
                record.events = None;
                false
            }
            None => false,
        };
        if already_released {
            state.calls.double_release += 1;
        }
        state.links.retain(|(from, to)| from != endpoint && to != endpoint);
        Ok(())
    }

    async fn release_pipeline(&self, pipeline: &PipelineHandle) -> Result<(), RelayError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.calls.release_pipeline += 1;
        state.check(RelayOp::Release).map_err(RelayError::Release)?;

        match state.pipelines.get_mut(pipeline) {
            Some(released) if *released => state.calls.double_release += 1,
            Some(released) => *released = true,
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_lifecycle() {
        let relay = MemoryRelay::new();
        let pipeline = relay.create_pipeline().await.unwrap();
        let (endpoint, mut events) = relay.create_endpoint(&pipeline).await.unwrap();

        let answer = relay.process_offer(&endpoint, "v=0\r\n").await.unwrap();
        assert!(answer.starts_with("v=0"));

        relay.gather_candidates(&endpoint).await.unwrap();
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        let (EndpointEvent::IceCandidateFound(first), EndpointEvent::IceCandidateFound(second)) =
            (first, second)
        else {
            panic!("expected candidates");
        };
        assert!(first.candidate.starts_with("candidate:1 "));
        assert!(second.candidate.starts_with("candidate:2 "));

        relay.release_endpoint(&endpoint).await.unwrap();
        assert!(events.recv().await.is_none());
        assert_eq!(relay.live_endpoints().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_offer() {
        let relay = MemoryRelay::new();
        let pipeline = relay.create_pipeline().await.unwrap();
        let (endpoint, _events) = relay.create_endpoint(&pipeline).await.unwrap();

        let err = relay.process_offer(&endpoint, "garbage").await.unwrap_err();
        assert_eq!(err, RelayError::ProcessOffer("malformed offer".into()));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let relay = MemoryRelay::new();
        let pipeline = relay.create_pipeline().await.unwrap();
        let (endpoint, _events) = relay.create_endpoint(&pipeline).await.unwrap();

        tokio_test::assert_ok!(relay.release_endpoint(&endpoint).await);
        tokio_test::assert_ok!(relay.release_endpoint(&endpoint).await);
        tokio_test::assert_ok!(relay.release_pipeline(&pipeline).await);
        tokio_test::assert_ok!(relay.release_pipeline(&pipeline).await);
        tokio_test::assert_ok!(relay.release_pipeline(&PipelineHandle::new("unknown")).await);

        let calls = relay.calls().await;
        assert_eq!(calls.double_release, 2);
        assert_eq!(relay.live_pipelines().await, 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let relay = MemoryRelay::new();
        relay.fail(RelayOp::CreatePipeline).await;
        tokio_test::assert_err!(relay.create_pipeline().await);

        relay.recover(RelayOp::CreatePipeline).await;
        tokio_test::assert_ok!(relay.create_pipeline().await);
        assert_eq!(relay.calls().await.create_pipeline, 2);
    }

    #[tokio::test]
    async fn test_connect_is_directed() {
        let relay = MemoryRelay::new();
        let pipeline = relay.create_pipeline().await.unwrap();
        let (a, _a_events) = relay.create_endpoint(&pipeline).await.unwrap();
        let (b, _b_events) = relay.create_endpoint(&pipeline).await.unwrap();

        relay.connect(&a, &b).await.unwrap();
        assert!(relay.is_linked(&a, &b).await);
        assert!(!relay.is_linked(&b, &a).await);

        // Connecting twice is harmless
        relay.connect(&a, &b).await.unwrap();
        assert_eq!(relay.endpoints_in(&pipeline).await, vec![a, b]);
    }
}
