//! Signaling coordinator
//!
//! The [`Coordinator`] is the transport-independent core: the server feeds
//! it one inbound text frame at a time per connection, and it answers
//! through each connection's outbound queue. Every event runs on its own
//! task, so a slow relay call for one room never holds up another room or
//! another event of the same connection.
//!
//! An offer owns relay resources from its first call onwards, so it runs to
//! completion on a detached task even if the caller stops waiting for it.

pub mod lifecycle;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::negotiation::Negotiator;
use crate::protocol::{ClientMessage, ConnectionId, RoomId, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::relay::{MediaRelay, TraversalConfig};
use crate::room::{RoomSnapshot, RoomStore};
use crate::stats::{CoordinatorCounters, CoordinatorStats};

pub use lifecycle::LifecycleManager;

/// Room signaling coordinator
pub struct Coordinator {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    negotiator: Arc<Negotiator>,
    lifecycle: Arc<LifecycleManager>,
    counters: Arc<CoordinatorCounters>,
}

impl Coordinator {
    /// Create a coordinator driving `relay`
    pub fn new(relay: Arc<dyn MediaRelay>, traversal: TraversalConfig) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomStore::new());
        let counters = Arc::new(CoordinatorCounters::new());

        let negotiator = Arc::new(Negotiator::new(
            Arc::clone(&relay),
            Arc::clone(&rooms),
            Arc::clone(&connections),
            traversal.network_traversal(),
            Arc::clone(&counters),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            relay,
            Arc::clone(&rooms),
            Arc::clone(&connections),
            Arc::clone(&counters),
        ));

        Self {
            connections,
            rooms,
            negotiator,
            lifecycle,
            counters,
        }
    }

    /// Connection registry
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Room store
    pub fn rooms(&self) -> &Arc<RoomStore> {
        &self.rooms
    }

    /// Register a new transport connection
    ///
    /// The caller must drain the returned receiver into the transport and
    /// call [`disconnect`](Self::disconnect) when the transport closes.
    pub async fn open_connection(
        &self,
        peer_addr: Option<SocketAddr>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        self.connections.register(peer_addr).await
    }

    /// Handle one inbound text frame
    pub async fn handle_text(&self, connection: ConnectionId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(Some(msg)) => self.dispatch(connection, msg).await,
            Ok(None) => {
                tracing::trace!(connection = connection, "Message ignored");
            }
            Err(rejection) => {
                tracing::warn!(connection = connection, error = %rejection, "Rejected message");
                self.connections.send(connection, rejection.response()).await;
            }
        }
    }

    /// Handle one validated message
    pub async fn dispatch(&self, connection: ConnectionId, msg: ClientMessage) {
        tracing::debug!(connection = connection, kind = %msg.kind(), room = %msg.room_id(), "Dispatching");

        match msg {
            ClientMessage::Join { room_id, role } => {
                self.lifecycle.join(connection, &room_id, role).await;
            }
            ClientMessage::Offer { room_id, role, sdp } => {
                let negotiator = Arc::clone(&self.negotiator);
                let lifecycle = Arc::clone(&self.lifecycle);
                let connections = Arc::clone(&self.connections);
                let offer = tokio::spawn(async move {
                    if let Err(e) = negotiator.handle_offer(connection, &room_id, role, &sdp).await {
                        tracing::warn!(room = %room_id, role = %role, connection = connection, error = %e, "Offer failed");
                        connections
                            .send(
                                connection,
                                ServerMessage::Stop {
                                    room_id: Some(room_id.clone()),
                                },
                            )
                            .await;
                    }
                    // A stop or disconnect may have skipped the room while the
                    // offer had it checked out
                    lifecycle.release_if_idle(&room_id).await;
                });

                if let Err(e) = offer.await {
                    tracing::error!(connection = connection, error = %e, "Offer task failed");
                }
            }
            ClientMessage::IceCandidate { room_id, candidate } => {
                if let Err(e) = self
                    .negotiator
                    .handle_ice_candidate(connection, &room_id, &candidate)
                    .await
                {
                    tracing::warn!(room = %room_id, connection = connection, error = %e, "Remote candidate rejected");
                }
            }
            ClientMessage::Stop { room_id } => {
                self.lifecycle.stop(connection, &room_id).await;
            }
            ClientMessage::PhaseChange { room_id, payload } => {
                let relayed = self
                    .connections
                    .broadcast_others(
                        &room_id,
                        connection,
                        ServerMessage::PhaseChange {
                            room_id: room_id.clone(),
                            payload,
                        },
                    )
                    .await;
                tracing::debug!(room = %room_id, relayed = relayed, "Phase change relayed");
            }
        }
    }

    /// Transport closed
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.lifecycle.disconnect(connection).await;
    }

    /// Point-in-time view of a room
    pub async fn room_snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        match self.rooms.get(room_id).await {
            Some(room) => Some(room.snapshot().await),
            None => None,
        }
    }

    /// Coordinator statistics
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            active_connections: self.connections.connection_count().await as u64,
            total_connections: self.connections.total_connections(),
            active_rooms: self.rooms.room_count().await as u64,
            ..self.counters.snapshot()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::Role;
    use crate::relay::memory::{MemoryRelay, RelayOp};

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n";

    fn coordinator(relay: &Arc<MemoryRelay>) -> Coordinator {
        Coordinator::new(Arc::clone(relay) as Arc<dyn MediaRelay>, TraversalConfig::default())
    }

    #[tokio::test]
    async fn test_join_acks_and_notifies_others() {
        let relay = Arc::new(MemoryRelay::new());
        let coordinator = coordinator(&relay);

        let (a, mut rx_a) = coordinator.open_connection(None).await;
        let (b, mut rx_b) = coordinator.open_connection(None).await;

        coordinator
            .handle_text(a, r#"{"type":"join","roomId":"r1","role":"caller"}"#)
            .await;
        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::JoinAck {
                room_id: Some("r1".into()),
                ok: true,
                error: None
            })
        );

        coordinator
            .handle_text(b, r#"{"type":"join-room","roomId":"r1","role":"callee"}"#)
            .await;
        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::PeerJoined {
                room_id: "r1".into(),
                role: Some(Role::Callee)
            })
        );
        assert!(matches!(rx_b.recv().await, Some(ServerMessage::JoinAck { ok: true, .. })));

        // Join alone never touches the relay
        assert_eq!(relay.calls().await.create_pipeline, 0);
        assert_eq!(coordinator.stats().await.active_rooms, 1);
    }

    #[tokio::test]
    async fn test_join_without_room_is_rejected() {
        let relay = Arc::new(MemoryRelay::new());
        let coordinator = coordinator(&relay);
        let (a, mut rx_a) = coordinator.open_connection(None).await;

        coordinator.handle_text(a, r#"{"type":"join","role":"caller"}"#).await;

        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::JoinAck {
                room_id: None,
                ok: false,
                error: Some("no roomId".into())
            })
        );
        assert_eq!(coordinator.rooms().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_offer_without_sdp_gets_stop() {
        let relay = Arc::new(MemoryRelay::new());
        let coordinator = coordinator(&relay);
        let (a, mut rx_a) = coordinator.open_connection(None).await;

        coordinator
            .handle_text(a, r#"{"type":"offer","roomId":"r1","role":"caller"}"#)
            .await;

        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::Stop {
                room_id: Some("r1".into())
            })
        );
        assert_eq!(relay.calls().await.create_pipeline, 0);
    }

    #[tokio::test]
    async fn test_phase_change_relayed_to_others() {
        let relay = Arc::new(MemoryRelay::new());
        let coordinator = coordinator(&relay);
        let (a, mut rx_a) = coordinator.open_connection(None).await;
        let (b, mut rx_b) = coordinator.open_connection(None).await;

        coordinator.handle_text(a, r#"{"type":"join","roomId":"r1"}"#).await;
        coordinator.handle_text(b, r#"{"type":"join","roomId":"r1"}"#).await;
        let _ = rx_a.recv().await;
        let _ = rx_a.recv().await;
        let _ = rx_b.recv().await;

        coordinator
            .handle_text(a, r#"{"type":"phase-change","roomId":"r1","phase":"countdown","seconds":3}"#)
            .await;

        let Some(ServerMessage::PhaseChange { room_id, payload }) = rx_b.recv().await else {
            panic!("expected phase-change");
        };
        assert_eq!(room_id, RoomId::from("r1"));
        assert_eq!(payload.get("phase").and_then(|v| v.as_str()), Some("countdown"));
        assert_eq!(payload.get("seconds").and_then(|v| v.as_u64()), Some(3));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats_track_relay_resources() {
        let relay = Arc::new(MemoryRelay::new());
        let coordinator = coordinator(&relay);
        let (a, _rx_a) = coordinator.open_connection(None).await;

        coordinator
            .dispatch(
                a,
                ClientMessage::Offer {
                    room_id: "r1".into(),
                    role: Role::Caller,
                    sdp: OFFER.into(),
                },
            )
            .await;

        let stats = coordinator.stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.live_pipelines(), 1);
        assert_eq!(stats.live_endpoints(), 1);

        coordinator.disconnect(a).await;

        let stats = coordinator.stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.live_pipelines(), 0);
        assert_eq!(stats.live_endpoints(), 0);
        assert_eq!(stats.rooms_released, 1);
    }

    #[tokio::test]
    async fn test_offer_failure_after_latency_releases_room() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(5)));
        relay.fail(RelayOp::CreateEndpoint).await;
        let coordinator = coordinator(&relay);
        let (a, mut rx_a) = coordinator.open_connection(None).await;

        coordinator
            .dispatch(
                a,
                ClientMessage::Offer {
                    room_id: "r3".into(),
                    role: Role::Callee,
                    sdp: OFFER.into(),
                },
            )
            .await;

        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::Stop {
                room_id: Some("r3".into())
            })
        );
        assert!(coordinator.room_snapshot(&"r3".into()).await.is_none());
        assert_eq!(relay.live_pipelines().await, 0);
    }
}
