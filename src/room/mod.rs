//! Room store
//!
//! A room pairs a caller and a callee around one relay pipeline. The store
//! maps room identifiers to rooms and owns the only decision that removes a
//! room: [`RoomStore::take_if_idle`], which runs under the store's write
//! lock so it cannot race with a new offer checking the room out.
//!
//! # Locking
//!
//! ```text
//!   RoomStore.rooms (RwLock)  ──►  Room.state (Mutex)
//!   Room.creation (Mutex)     ──►  Room.state (Mutex)
//!   Room.gates[role] (Mutex)  ──►  Room.state (Mutex)
//! ```
//!
//! Locks are only ever taken in the direction of the arrows. `Room.state`
//! is never held across a relay call; the creation and per-role gates are, which is what
//! makes "create the endpoint if absent" atomic per (room, role) without
//! blocking the other role.

pub mod entry;
pub mod store;

pub use entry::{EndpointSlot, Room, RoomResources, RoomSnapshot, RoomState, SlotSnapshot};
pub use store::{NegotiationGuard, RoomStore};
