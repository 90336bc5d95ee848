//! Room store implementation

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::entry::{Room, RoomResources};
use crate::protocol::RoomId;

/// Keeps a room checked out while an offer is processed
///
/// A checked-out room is never released. Dropping the guard checks it back
/// in.
#[derive(Debug)]
pub struct NegotiationGuard {
    room: Arc<Room>,
}

impl NegotiationGuard {
    /// The checked-out room
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }
}

impl Deref for NegotiationGuard {
    type Target = Room;

    fn deref(&self) -> &Room {
        &self.room
    }
}

impl Drop for NegotiationGuard {
    fn drop(&mut self) {
        self.room.end_negotiation();
    }
}

/// Map of room identifier to room
///
/// Only the exists-check-then-create step is serialized, per store; rooms
/// themselves are independent and carry their own locks.
pub struct RoomStore {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get a room, creating an empty shell if it does not exist
    ///
    /// Never creates relay resources.
    pub async fn get_or_create(&self, id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        Arc::clone(rooms.entry(id.clone()).or_insert_with(|| {
            tracing::info!(room = %id, "Room created");
            Arc::new(Room::new(id.clone()))
        }))
    }

    /// Get or create a room and check it out for an offer
    ///
    /// The check-out happens under the store's write lock, so it can never
    /// interleave with [`take_if_idle`](Self::take_if_idle) removing the
    /// same room.
    pub async fn checkout(&self, id: &RoomId) -> NegotiationGuard {
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.entry(id.clone()).or_insert_with(|| {
            tracing::info!(room = %id, "Room created");
            Arc::new(Room::new(id.clone()))
        }));
        room.begin_negotiation();

        NegotiationGuard { room }
    }

    /// Get a room
    pub async fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Remove a room unconditionally
    ///
    /// The caller becomes responsible for releasing its resources.
    pub async fn remove(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.write().await.remove(id)
    }

    /// Remove `room` only if the store still maps its id to this instance
    pub async fn remove_if_same(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(room.id()) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(room.id());
                true
            }
            _ => false,
        }
    }

    /// Remove a room if nothing holds it any more
    ///
    /// A room is idle when no offer has it checked out and neither role has
    /// a bound connection. The room is marked released and removed
    /// atomically, and its resources are handed back exactly once.
    pub async fn take_if_idle(&self, id: &RoomId) -> Option<RoomResources> {
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.get(id)?);

        if room.negotiations() > 0 {
            tracing::debug!(room = %id, negotiations = room.negotiations(), "Room busy, keeping it");
            return None;
        }

        let mut state = room.state().lock().await;
        if state.has_binding() {
            tracing::debug!(room = %id, "Room still has a bound role, keeping it");
            return None;
        }

        let resources = state.release();
        drop(state);
        rooms.remove(id);

        Some(resources)
    }

    /// Number of rooms
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Identifiers of all rooms, sorted
    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}
