//! Room and endpoint slot types
//!
//! This module defines the per-room state stored in the room store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::{ConnectionId, Role, RoomId};
use crate::relay::{EndpointHandle, PipelineHandle};

/// One role's media endpoint and transport binding
#[derive(Debug, Default)]
pub struct EndpointSlot {
    /// Relay endpoint, created on the role's first offer
    pub endpoint: Option<EndpointHandle>,

    /// Connection currently bound to the role
    pub connection: Option<ConnectionId>,

    /// Where relay-discovered candidates for this endpoint are delivered
    target: Option<watch::Sender<Option<ConnectionId>>>,

    /// Task forwarding the endpoint's relay events
    forwarder: Option<JoinHandle<()>>,
}

impl EndpointSlot {
    /// Check if a connection is bound
    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn attach(
        &mut self,
        endpoint: EndpointHandle,
        target: watch::Sender<Option<ConnectionId>>,
        forwarder: JoinHandle<()>,
    ) {
        self.endpoint = Some(endpoint);
        self.target = Some(target);
        self.forwarder = Some(forwarder);
    }

    /// Bind a connection, returning the one it replaced
    pub(crate) fn bind(&mut self, connection: ConnectionId) -> Option<ConnectionId> {
        if let Some(target) = &self.target {
            target.send_replace(Some(connection));
        }
        self.connection.replace(connection)
    }

    pub(crate) fn unbind(&mut self) {
        if let Some(target) = &self.target {
            target.send_replace(None);
        }
        self.connection = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PairLink {
    caller: EndpointHandle,
    callee: EndpointHandle,
    established: bool,
}

/// Mutable state of a room
#[derive(Debug, Default)]
pub struct RoomState {
    /// Shared relay pipeline, created at most once
    pub pipeline: Option<PipelineHandle>,

    slots: [EndpointSlot; 2],

    /// Endpoint pair the bidirectional connect was issued for
    pair: Option<PairLink>,

    released: bool,
}

impl RoomState {
    /// Slot for `role`
    pub fn slot(&self, role: Role) -> &EndpointSlot {
        &self.slots[role.index()]
    }

    pub(crate) fn slot_mut(&mut self, role: Role) -> &mut EndpointSlot {
        &mut self.slots[role.index()]
    }

    /// Check if any role has a bound connection
    pub fn has_binding(&self) -> bool {
        self.slots.iter().any(EndpointSlot::is_bound)
    }

    /// Check if the room's resources have been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Check if both directions of the endpoint pair are connected
    pub fn is_connected(&self) -> bool {
        self.pair.as_ref().is_some_and(|pair| pair.established)
    }

    /// Clear every slot bound to `connection`, returning their roles
    pub(crate) fn unbind_connection(&mut self, connection: ConnectionId) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| {
                let slot = self.slot_mut(*role);
                if slot.connection == Some(connection) {
                    slot.unbind();
                    true
                } else {
                    false
                }
            })
            .collect()
    }

    /// Claim the right to connect the current endpoint pair
    ///
    /// Returns `(caller, callee)` only if both endpoints exist and this pair
    /// has not been connected or claimed already.
    pub(crate) fn claim_pair(&mut self) -> Option<(EndpointHandle, EndpointHandle)> {
        let caller = self.slot(Role::Caller).endpoint.clone()?;
        let callee = self.slot(Role::Callee).endpoint.clone()?;

        if let Some(pair) = &self.pair {
            if pair.caller == caller && pair.callee == callee {
                return None;
            }
        }

        self.pair = Some(PairLink {
            caller: caller.clone(),
            callee: callee.clone(),
            established: false,
        });
        Some((caller, callee))
    }

    /// Record the outcome of connecting a claimed pair
    ///
    /// A failed pair is forgotten so a later offer can try again.
    pub(crate) fn finish_pair(&mut self, caller: &EndpointHandle, callee: &EndpointHandle, established: bool) {
        let matches = self
            .pair
            .as_ref()
            .is_some_and(|pair| &pair.caller == caller && &pair.callee == callee);

        if matches {
            if established {
                if let Some(pair) = self.pair.as_mut() {
                    pair.established = true;
                }
            } else {
                self.pair = None;
            }
        }
    }

    /// Mark the room released and take everything that must be freed
    ///
    /// Calling this again yields empty resources.
    pub(crate) fn release(&mut self) -> RoomResources {
        self.released = true;
        self.pair = None;

        let mut resources = RoomResources {
            pipeline: self.pipeline.take(),
            endpoints: Vec::new(),
            forwarders: Vec::new(),
        };

        for slot in &mut self.slots {
            slot.unbind();
            slot.target = None;
            if let Some(endpoint) = slot.endpoint.take() {
                resources.endpoints.push(endpoint);
            }
            if let Some(forwarder) = slot.forwarder.take() {
                resources.forwarders.push(forwarder);
            }
        }

        resources
    }
}

/// Resources taken out of a released room
#[derive(Debug)]
pub struct RoomResources {
    pub pipeline: Option<PipelineHandle>,
    pub endpoints: Vec<EndpointHandle>,
    pub(crate) forwarders: Vec<JoinHandle<()>>,
}

impl RoomResources {
    /// Check if there is nothing to release on the relay
    pub fn is_empty(&self) -> bool {
        self.pipeline.is_none() && self.endpoints.is_empty()
    }

    /// Stop the endpoint event forwarders
    pub(crate) fn abort_forwarders(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
    }
}

/// Point-in-time view of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub endpoint: Option<EndpointHandle>,
    pub connection: Option<ConnectionId>,
}

/// Point-in-time view of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub pipeline: Option<PipelineHandle>,
    pub caller: SlotSnapshot,
    pub callee: SlotSnapshot,
    pub connected: bool,
    pub negotiations: usize,
}

impl RoomSnapshot {
    /// Slot snapshot for `role`
    pub fn slot(&self, role: Role) -> &SlotSnapshot {
        match role {
            Role::Caller => &self.caller,
            Role::Callee => &self.callee,
        }
    }
}

/// Entry for a single room in the store
#[derive(Debug)]
pub struct Room {
    id: RoomId,

    state: Mutex<RoomState>,

    /// Held while the pipeline is being created
    creation: Mutex<()>,

    /// Per-role negotiation gates, indexed by `Role::index`
    gates: [Mutex<()>; 2],

    /// Offers currently being processed for this room
    negotiations: AtomicUsize,

    created_at: Instant,
}

impl Room {
    pub(super) fn new(id: RoomId) -> Self {
        Self {
            id,
            state: Mutex::new(RoomState::default()),
            creation: Mutex::new(()),
            gates: [Mutex::new(()), Mutex::new(())],
            negotiations: AtomicUsize::new(0),
            created_at: Instant::now(),
        }
    }

    /// Room identifier
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Room state lock
    pub fn state(&self) -> &Mutex<RoomState> {
        &self.state
    }

    /// Pipeline, if created
    pub async fn pipeline(&self) -> Option<PipelineHandle> {
        self.state.lock().await.pipeline.clone()
    }

    /// Check if the room has been released
    pub async fn is_released(&self) -> bool {
        self.state.lock().await.released
    }

    /// Pipeline creation gate
    ///
    /// A dropped guard releases it, so a creation abandoned halfway lets the
    /// next waiter try again.
    pub(crate) fn creation_gate(&self) -> &Mutex<()> {
        &self.creation
    }

    /// Negotiation gate for `role`
    pub(crate) fn gate(&self, role: Role) -> &Mutex<()> {
        &self.gates[role.index()]
    }

    /// Number of offers in flight
    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::Acquire)
    }

    pub(super) fn begin_negotiation(&self) {
        self.negotiations.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn end_negotiation(&self) {
        self.negotiations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Time since the room was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Point-in-time view of the room
    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.state.lock().await;
        let slot = |role: Role| SlotSnapshot {
            endpoint: state.slot(role).endpoint.clone(),
            connection: state.slot(role).connection,
        };

        RoomSnapshot {
            id: self.id.clone(),
            pipeline: state.pipeline.clone(),
            caller: slot(Role::Caller),
            callee: slot(Role::Callee),
            connected: state.is_connected(),
            negotiations: self.negotiations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_endpoints() -> RoomState {
        let mut state = RoomState::default();
        state.slot_mut(Role::Caller).endpoint = Some(EndpointHandle::new("a"));
        state.slot_mut(Role::Callee).endpoint = Some(EndpointHandle::new("b"));
        state
    }

    #[test]
    fn test_claim_pair_once() {
        let mut state = with_endpoints();

        let (caller, callee) = state.claim_pair().unwrap();
        assert!(state.claim_pair().is_none());

        state.finish_pair(&caller, &callee, true);
        assert!(state.is_connected());
        assert!(state.claim_pair().is_none());
    }

    #[test]
    fn test_failed_pair_can_be_reclaimed() {
        let mut state = with_endpoints();

        let (caller, callee) = state.claim_pair().unwrap();
        state.finish_pair(&caller, &callee, false);

        assert!(!state.is_connected());
        assert!(state.claim_pair().is_some());
    }

    #[test]
    fn test_claim_requires_both_endpoints() {
        let mut state = RoomState::default();
        state.slot_mut(Role::Callee).endpoint = Some(EndpointHandle::new("b"));

        assert!(state.claim_pair().is_none());
    }

    #[test]
    fn test_unbind_connection() {
        let mut state = RoomState::default();
        state.slot_mut(Role::Caller).bind(1);
        state.slot_mut(Role::Callee).bind(2);

        assert_eq!(state.unbind_connection(1), vec![Role::Caller]);
        assert!(state.has_binding());
        assert_eq!(state.unbind_connection(1), Vec::<Role>::new());
        assert_eq!(state.unbind_connection(2), vec![Role::Callee]);
        assert!(!state.has_binding());
    }

    #[test]
    fn test_release_takes_everything_once() {
        let mut state = with_endpoints();
        state.pipeline = Some(PipelineHandle::new("p"));

        let resources = state.release();
        assert_eq!(resources.pipeline, Some(PipelineHandle::new("p")));
        assert_eq!(resources.endpoints.len(), 2);
        assert!(state.is_released());

        assert!(state.release().is_empty());
    }
}
