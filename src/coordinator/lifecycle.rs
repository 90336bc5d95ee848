//! Join, stop and disconnect handling, and room release

use std::sync::Arc;

use crate::protocol::{ConnectionId, Role, RoomId, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::relay::MediaRelay;
use crate::room::{RoomResources, RoomStore};
use crate::stats::CoordinatorCounters;

/// Reconciles presence and bindings, and decides when a room is released
pub struct LifecycleManager {
    relay: Arc<dyn MediaRelay>,
    rooms: Arc<RoomStore>,
    connections: Arc<ConnectionRegistry>,
    counters: Arc<CoordinatorCounters>,
}

impl LifecycleManager {
    pub fn new(
        relay: Arc<dyn MediaRelay>,
        rooms: Arc<RoomStore>,
        connections: Arc<ConnectionRegistry>,
        counters: Arc<CoordinatorCounters>,
    ) -> Self {
        Self {
            relay,
            rooms,
            connections,
            counters,
        }
    }

    /// Announce a connection in a room
    ///
    /// Creates the room shell if needed but never any relay resources. The
    /// shell has no bound role, so it lives only as long as the joining
    /// connection stays in the room: its `stop` or disconnect releases it
    /// unless an offer has bound a role in the meantime.
    pub async fn join(&self, connection: ConnectionId, room_id: &RoomId, role: Option<Role>) {
        self.rooms.get_or_create(room_id).await;

        if !self.connections.join_group(connection, room_id).await {
            // Disconnected while the join was queued; the shell must not outlive it
            tracing::debug!(room = %room_id, connection = connection, "Join from closed connection");
            self.release_if_idle(room_id).await;
            return;
        }

        let notified = self
            .connections
            .broadcast_others(
                room_id,
                connection,
                ServerMessage::PeerJoined {
                    room_id: room_id.clone(),
                    role,
                },
            )
            .await;

        self.connections
            .send(
                connection,
                ServerMessage::JoinAck {
                    room_id: Some(room_id.clone()),
                    ok: true,
                    error: None,
                },
            )
            .await;

        tracing::info!(
            room = %room_id,
            connection = connection,
            role = ?role,
            notified = notified,
            "Joined room"
        );
    }

    /// Explicit stop: the connection leaves the room
    pub async fn stop(&self, connection: ConnectionId, room_id: &RoomId) {
        self.connections.leave_group(connection, room_id).await;
        self.connections.unbind(connection, room_id).await;

        let released_roles = match self.rooms.get(room_id).await {
            Some(room) => room.state().lock().await.unbind_connection(connection),
            None => Vec::new(),
        };

        self.connections
            .broadcast_others(
                room_id,
                connection,
                ServerMessage::Stop {
                    room_id: Some(room_id.clone()),
                },
            )
            .await;

        tracing::info!(room = %room_id, connection = connection, roles = ?released_roles, "Stopped");
        self.release_if_idle(room_id).await;
    }

    /// Transport went away: reconcile every room the connection touched
    pub async fn disconnect(&self, connection: ConnectionId) {
        let Some(entry) = self.connections.unregister(connection).await else {
            return;
        };

        for room_id in entry.touched_rooms() {
            let unbound = match self.rooms.get(&room_id).await {
                Some(room) => room.state().lock().await.unbind_connection(connection),
                None => Vec::new(),
            };

            // Only roles still held by this connection are reported; one
            // taken over by another connection stays with it
            let role = unbound.first().copied();

            self.connections
                .broadcast_others(
                    &room_id,
                    connection,
                    ServerMessage::PeerLeft {
                        room_id: room_id.clone(),
                        role,
                    },
                )
                .await;

            self.release_if_idle(&room_id).await;
        }

        tracing::info!(
            connection = connection,
            rooms = entry.rooms.len(),
            bindings = entry.bindings.len(),
            duration_ms = entry.duration().as_millis() as u64,
            "Connection closed"
        );
    }

    /// Release the room if no role is bound and no offer holds it
    ///
    /// Safe to call any number of times; only the call that removes the
    /// room from the store releases anything. Returns true if this call
    /// released the room.
    pub async fn release_if_idle(&self, room_id: &RoomId) -> bool {
        let Some(resources) = self.rooms.take_if_idle(room_id).await else {
            return false;
        };

        self.release(room_id, resources).await;
        true
    }

    async fn release(&self, room_id: &RoomId, mut resources: RoomResources) {
        resources.abort_forwarders();

        for endpoint in &resources.endpoints {
            if let Err(e) = self.relay.release_endpoint(endpoint).await {
                tracing::warn!(room = %room_id, endpoint = %endpoint, error = %e, "Endpoint release failed");
            }
            self.counters.endpoint_released();
        }

        if let Some(pipeline) = &resources.pipeline {
            if let Err(e) = self.relay.release_pipeline(pipeline).await {
                tracing::warn!(room = %room_id, pipeline = %pipeline, error = %e, "Pipeline release failed");
            }
            self.counters.pipeline_released();
        }

        self.counters.room_released();
        tracing::info!(
            room = %room_id,
            endpoints = resources.endpoints.len(),
            pipeline = resources.pipeline.is_some(),
            "Room released"
        );
    }
}
