//! Connection registry implementation

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

use super::entry::ConnectionEntry;
use crate::protocol::{ConnectionId, Role, RoomId, ServerMessage};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    groups: HashMap<RoomId, BTreeSet<ConnectionId>>,
}

impl RegistryInner {
    fn leave_group(&mut self, id: ConnectionId, room: &RoomId) {
        if let Some(members) = self.groups.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(room);
            }
        }
    }
}

/// Registry of live client connections
///
/// A single `RwLock` guards both the connection map and the presence
/// groups so membership changes are atomic with registration.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
    total_connections: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_id: AtomicU64::new(1),
            total_connections: AtomicU64::new(0),
        }
    }

    /// Register a new connection
    ///
    /// Returns its identifier and the receiver the transport must drain.
    pub async fn register(
        &self,
        peer_addr: Option<SocketAddr>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .write()
            .await
            .connections
            .insert(id, ConnectionEntry::new(id, peer_addr, tx));
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(connection = id, peer = ?peer_addr, "Connection registered");
        (id, rx)
    }

    /// Remove a connection and all of its group memberships
    ///
    /// The returned entry still lists the rooms and bindings the connection
    /// had, for disconnect reconciliation. Returns `None` if the connection
    /// was already removed.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&id)?;

        for room in &entry.rooms {
            inner.leave_group(id, room);
        }

        tracing::debug!(
            connection = id,
            rooms = entry.rooms.len(),
            bindings = entry.bindings.len(),
            duration_ms = entry.duration().as_millis() as u64,
            "Connection unregistered"
        );
        Some(entry)
    }

    /// Check if a connection is still registered
    pub async fn is_connected(&self, id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&id)
    }

    /// Unicast a message
    pub async fn send(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(&id) {
            Some(entry) => entry.send(msg),
            None => {
                tracing::debug!(connection = id, "Dropping message for unknown connection");
                false
            }
        }
    }

    /// Add a connection to a room's presence group
    ///
    /// Returns false if the connection is not registered.
    pub async fn join_group(&self, id: ConnectionId, room: &RoomId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&id) else {
            return false;
        };

        entry.rooms.insert(room.clone());
        inner.groups.entry(room.clone()).or_default().insert(id);
        true
    }

    /// Remove a connection from a room's presence group
    pub async fn leave_group(&self, id: ConnectionId, room: &RoomId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(&id) {
            entry.rooms.remove(room);
        }
        inner.leave_group(id, room);
    }

    /// Current members of a room's presence group
    pub async fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .groups
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send to every group member except `except`
    ///
    /// Returns the number of connections the message was queued for.
    pub async fn broadcast_others(&self, room: &RoomId, except: ConnectionId, msg: ServerMessage) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.groups.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| **id != except)
            .filter_map(|id| inner.connections.get(id))
            .filter(|entry| entry.send(msg.clone()))
            .count()
    }

    /// Record that a connection is bound to `role` in `room`
    ///
    /// Binding also joins the presence group. Returns false if the
    /// connection is no longer registered, in which case nothing changes.
    pub async fn bind(&self, id: ConnectionId, room: &RoomId, role: Role) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&id) else {
            return false;
        };

        entry.bindings.insert(room.clone(), role);
        entry.rooms.insert(room.clone());
        inner.groups.entry(room.clone()).or_default().insert(id);
        true
    }

    /// Drop a connection's binding in `room`
    pub async fn unbind(&self, id: ConnectionId, room: &RoomId) -> Option<Role> {
        self.inner
            .write()
            .await
            .connections
            .get_mut(&id)
            .and_then(|entry| entry.bindings.remove(room))
    }

    /// Role a connection is bound to in `room`
    pub async fn binding(&self, id: ConnectionId, room: &RoomId) -> Option<Role> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|entry| entry.bindings.get(room).copied())
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Connections ever registered
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::new();

        let (a, _rx_a) = registry.register(None).await;
        let (b, _rx_b) = registry.register(None).await;
        assert_ne!(a, b);
        assert_eq!(registry.connection_count().await, 2);

        let entry = registry.unregister(a).await.unwrap();
        assert_eq!(entry.id, a);
        assert!(!registry.is_connected(a).await);
        assert!(registry.unregister(a).await.is_none());

        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.total_connections(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::from("r1");

        let (a, mut rx_a) = registry.register(None).await;
        let (b, mut rx_b) = registry.register(None).await;
        assert!(registry.join_group(a, &room).await);
        assert!(registry.join_group(b, &room).await);

        let sent = registry
            .broadcast_others(&room, a, ServerMessage::Stop { room_id: Some(room.clone()) })
            .await;

        assert_eq!(sent, 1);
        assert_eq!(
            rx_b.recv().await,
            Some(ServerMessage::Stop {
                room_id: Some(room.clone())
            })
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_leaves_groups() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::from("r1");

        let (a, _rx_a) = registry.register(None).await;
        registry.join_group(a, &room).await;
        registry.bind(a, &"r2".into(), Role::Caller).await;

        let entry = registry.unregister(a).await.unwrap();
        assert_eq!(entry.touched_rooms().len(), 2);
        assert!(registry.members(&room).await.is_empty());
        assert!(registry.members(&"r2".into()).await.is_empty());
    }

    #[tokio::test]
    async fn test_bind_requires_live_connection() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::from("r1");

        let (a, _rx_a) = registry.register(None).await;
        assert!(registry.bind(a, &room, Role::Callee).await);
        assert_eq!(registry.binding(a, &room).await, Some(Role::Callee));
        assert_eq!(registry.members(&room).await, vec![a]);

        assert_eq!(registry.unbind(a, &room).await, Some(Role::Callee));
        assert_eq!(registry.binding(a, &room).await, None);

        registry.unregister(a).await;
        assert!(!registry.bind(a, &room, Role::Callee).await);
        assert!(!registry.join_group(a, &room).await);
    }
}
