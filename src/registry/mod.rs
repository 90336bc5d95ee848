//! Connection registry
//!
//! Tracks every live client connection, the presence groups it belongs to
//! and which role it is bound to in each room.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<ConnectionRegistry>
//!              ┌──────────────────────────────────┐
//!              │ connections: HashMap<Id,         │
//!              │   ConnectionEntry {              │
//!              │     outbound: mpsc::Tx,          │
//!              │     rooms, bindings,             │
//!              │   }                              │
//!              │ >                                │
//!              │ groups: HashMap<RoomId, {Id}>    │
//!              └────────────────┬─────────────────┘
//!                               │
//!         ┌─────────────────────┼─────────────────────┐
//!         ▼                     ▼                     ▼
//!    send(id, msg)   broadcast_others(room)     unregister(id)
//!    (unicast)       (peer-joined, stop, …)     (disconnect fan-out)
//! ```
//!
//! Outbound messages go through an unbounded channel per connection, so
//! sends never block and messages to one connection keep their order.

pub mod entry;
pub mod store;

pub use entry::ConnectionEntry;
pub use store::ConnectionRegistry;
