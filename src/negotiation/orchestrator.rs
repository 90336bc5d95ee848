//! Offer/answer and ICE handling per role
//!
//! # Offer flow
//!
//! ```text
//!   offer(conn, room, role, sdp)
//!     │
//!     ├─► RoomStore::checkout          room pinned until the offer finishes
//!     ├─► ensure_pipeline             single-flight, may wait on another offer
//!     ├─► gate[role].lock             one negotiation per (room, role)
//!     │     ├─► create endpoint       only if the slot has none
//!     │     │     └─► spawn forwarder relay events → bound connection
//!     │     ├─► process_offer         failure aborts this offer only
//!     │     ├─► bind conn to role     refused if the connection is gone
//!     │     ├─► send answer           unicast to conn
//!     │     └─► gather_candidates     fire-and-forget
//!     └─► connect_both_ways           once per endpoint pair
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use super::provisioner::PipelineProvisioner;
use crate::error::{Result, SignalingError};
use crate::protocol::{ConnectionId, IceCandidate, Role, RoomId, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::relay::{EndpointEvent, EndpointEvents, EndpointHandle, MediaRelay, NetworkTraversal, PipelineHandle};
use crate::room::{Room, RoomStore};
use crate::stats::CoordinatorCounters;

/// Runs the offer/answer and ICE protocol against the media relay
pub struct Negotiator {
    relay: Arc<dyn MediaRelay>,
    rooms: Arc<RoomStore>,
    connections: Arc<ConnectionRegistry>,
    provisioner: PipelineProvisioner,
    traversal: NetworkTraversal,
    counters: Arc<CoordinatorCounters>,
}

impl Negotiator {
    pub fn new(
        relay: Arc<dyn MediaRelay>,
        rooms: Arc<RoomStore>,
        connections: Arc<ConnectionRegistry>,
        traversal: NetworkTraversal,
        counters: Arc<CoordinatorCounters>,
    ) -> Self {
        let provisioner = PipelineProvisioner::new(Arc::clone(&relay), Arc::clone(&rooms), Arc::clone(&counters));

        Self {
            relay,
            rooms,
            connections,
            provisioner,
            traversal,
            counters,
        }
    }

    /// Pipeline provisioner used for offers
    pub fn provisioner(&self) -> &PipelineProvisioner {
        &self.provisioner
    }

    /// Handle an SDP offer and return the answer
    ///
    /// The answer is also queued for `connection`, and only for it. On error
    /// nothing is sent; the caller owes the connection a `stop`. The room
    /// stays checked out for the duration of the call, so it is the caller's
    /// job to re-evaluate release afterwards.
    pub async fn handle_offer(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        role: Role,
        sdp: &str,
    ) -> Result<String> {
        let room = self.rooms.checkout(room_id).await;
        let pipeline = self.provisioner.ensure_pipeline(room.room()).await?;

        let gate = room.gate(role).lock().await;

        let endpoint = self.ensure_endpoint(room.room(), role, &pipeline, connection).await?;
        let answer = self.relay.process_offer(&endpoint, sdp).await?;
        self.bind(&room, role, connection).await?;

        self.connections
            .send(
                connection,
                ServerMessage::Answer {
                    room_id: room_id.clone(),
                    sdp: answer.clone(),
                },
            )
            .await;
        tracing::info!(room = %room_id, role = %role, connection = connection, "Offer handled");

        if let Err(e) = self.relay.gather_candidates(&endpoint).await {
            tracing::warn!(room = %room_id, role = %role, error = %e, "Candidate gathering failed");
        }
        drop(gate);

        self.connect_both_ways(room.room()).await;

        Ok(answer)
    }

    /// Forward a remote candidate to the endpoint of the sender's role
    ///
    /// Candidates from connections not bound in the room, or for rooms that
    /// no longer exist, are dropped silently.
    pub async fn handle_ice_candidate(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let Some(room) = self.rooms.get(room_id).await else {
            tracing::debug!(room = %room_id, connection = connection, "Candidate for unknown room dropped");
            return Ok(());
        };
        let Some(role) = self.connections.binding(connection, room_id).await else {
            tracing::debug!(room = %room_id, connection = connection, "Candidate from unbound connection dropped");
            return Ok(());
        };

        let endpoint = {
            let state = room.state().lock().await;
            let slot = state.slot(role);
            match (&slot.endpoint, slot.connection) {
                (Some(endpoint), Some(bound)) if bound == connection => endpoint.clone(),
                _ => {
                    tracing::debug!(room = %room_id, role = %role, connection = connection, "Candidate for stale binding dropped");
                    return Ok(());
                }
            }
        };

        self.relay.add_ice_candidate(&endpoint, candidate).await?;
        tracing::trace!(room = %room_id, role = %role, "Remote candidate added");
        Ok(())
    }

    /// Return the role's endpoint, creating it on first use
    ///
    /// Must be called with the role's gate held.
    async fn ensure_endpoint(
        &self,
        room: &Arc<Room>,
        role: Role,
        pipeline: &PipelineHandle,
        connection: ConnectionId,
    ) -> Result<EndpointHandle> {
        if let Some(endpoint) = room.state().lock().await.slot(role).endpoint.clone() {
            return Ok(endpoint);
        }

        let (endpoint, events) = self.relay.create_endpoint(pipeline).await?;
        self.counters.endpoint_created();

        if !self.traversal.is_empty() {
            if let Err(e) = self.relay.configure_network_traversal(&endpoint, &self.traversal).await {
                tracing::warn!(endpoint = %endpoint, error = %e, "Network traversal configuration failed");
            }
        }

        let (target, target_rx) = watch::channel(Some(connection));
        let forwarder = tokio::spawn(forward_endpoint_events(
            room.id().clone(),
            role,
            endpoint.clone(),
            events,
            target_rx,
            Arc::clone(&self.connections),
        ));

        room.state().lock().await.slot_mut(role).attach(endpoint.clone(), target, forwarder);
        tracing::info!(room = %room.id(), role = %role, endpoint = %endpoint, "Endpoint created");

        Ok(endpoint)
    }

    /// Bind `connection` to `role`, unless it disconnected meanwhile
    async fn bind(&self, room: &Room, role: Role, connection: ConnectionId) -> Result<()> {
        // Registry binding happens under the room lock so a concurrent
        // disconnect either sees the binding or makes it fail
        let mut state = room.state().lock().await;
        if !self.connections.bind(connection, room.id(), role).await {
            return Err(SignalingError::ConnectionClosed(connection));
        }

        if let Some(previous) = state.slot_mut(role).bind(connection) {
            if previous != connection {
                tracing::info!(
                    room = %room.id(),
                    role = %role,
                    previous = previous,
                    connection = connection,
                    "Role rebound to a new connection"
                );
            }
        }
        Ok(())
    }

    /// Connect the caller and callee endpoints in both directions
    ///
    /// Does nothing unless both endpoints exist, and only once per endpoint
    /// pair. Failures are logged, not propagated.
    async fn connect_both_ways(&self, room: &Arc<Room>) {
        let Some((caller, callee)) = room.state().lock().await.claim_pair() else {
            return;
        };

        tracing::info!(room = %room.id(), "Both endpoints ready, connecting");
        let forward = self.relay.connect(&caller, &callee).await;
        let backward = self.relay.connect(&callee, &caller).await;

        let established = match (&forward, &backward) {
            (Ok(()), Ok(())) => {
                self.counters.pair_connected();
                tracing::info!(room = %room.id(), caller = %caller, callee = %callee, "Endpoints fully connected");
                true
            }
            _ => {
                if let Err(e) = &forward {
                    tracing::warn!(room = %room.id(), error = %e, "Connect caller -> callee failed");
                }
                if let Err(e) = &backward {
                    tracing::warn!(room = %room.id(), error = %e, "Connect callee -> caller failed");
                }
                false
            }
        };

        room.state().lock().await.finish_pair(&caller, &callee, established);
    }
}

/// Deliver one endpoint's relay events
///
/// Candidates go, in emission order, to whichever connection is bound to the
/// role at the time; other events are only logged. Ends when the relay
/// closes the event stream.
async fn forward_endpoint_events(
    room_id: RoomId,
    role: Role,
    endpoint: EndpointHandle,
    mut events: EndpointEvents,
    target: watch::Receiver<Option<ConnectionId>>,
    connections: Arc<ConnectionRegistry>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EndpointEvent::IceCandidateFound(candidate) => {
                let bound = *target.borrow();
                match bound {
                    Some(connection) => {
                        connections
                            .send(connection, ServerMessage::IceCandidate { candidate })
                            .await;
                    }
                    None => {
                        tracing::debug!(room = %room_id, role = %role, "Local candidate dropped, role unbound");
                    }
                }
            }
            EndpointEvent::MediaStateChanged(state) => {
                tracing::info!(room = %room_id, role = %role, endpoint = %endpoint, state = %state, "Media state changed");
            }
            EndpointEvent::ConnectionStateChanged(state) => {
                tracing::info!(room = %room_id, role = %role, endpoint = %endpoint, state = %state, "Connection state changed");
            }
        }
    }

    tracing::debug!(room = %room_id, role = %role, endpoint = %endpoint, "Endpoint event stream closed");
}
