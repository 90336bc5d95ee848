//! # room-signal
//!
//! WebRTC signaling coordinator for two-party rooms backed by an external
//! media relay.
//!
//! Each room pairs a `caller` and a `callee`. The coordinator creates one
//! shared media pipeline per room (exactly once, even under concurrent
//! offers), gives each role its own relay endpoint, exchanges session
//! descriptions and ICE candidates, connects the two endpoints in both
//! directions once both exist, and releases everything only after both
//! roles have left.
//!
//! # Architecture
//!
//! ```text
//!   WebSocket clients
//!         │  join / offer / ice-candidate / stop / phase-change
//!         ▼
//!   SignalingServer ──► Coordinator
//!                         ├── ConnectionRegistry  (connections, presence groups, bindings)
//!                         ├── RoomStore           (room id → Room)
//!                         ├── Negotiator          (offer/answer, ICE, bidirectional connect)
//!                         │     └── PipelineProvisioner (single-flight pipeline creation)
//!                         └── LifecycleManager    (join, stop, disconnect, release)
//!                                   │
//!                                   ▼
//!                         dyn MediaRelay (external media service)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use room_signal::relay::memory::MemoryRelay;
//! use room_signal::{Coordinator, ServerConfig, SignalingServer, TraversalConfig};
//!
//! #[tokio::main]
//! async fn main() -> room_signal::Result<()> {
//!     let coordinator = Coordinator::new(Arc::new(MemoryRelay::new()), TraversalConfig::from_env());
//!     let server = SignalingServer::new(ServerConfig::from_env(), Arc::new(coordinator));
//!     server.run().await
//! }
//! ```

pub mod coordinator;
pub mod error;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;
pub mod stats;

pub use coordinator::{Coordinator, LifecycleManager};
pub use error::{Result, SignalingError};
pub use protocol::{ClientMessage, ConnectionId, IceCandidate, Role, RoomId, ServerMessage};
pub use relay::{MediaRelay, TraversalConfig};
pub use server::{ServerConfig, SignalingServer};
