//! Signaling wire protocol
//!
//! Clients talk to the coordinator with JSON objects carrying a `type`
//! discriminator and camelCase fields:
//!
//! | Direction | `type`          | Fields                              |
//! |-----------|-----------------|-------------------------------------|
//! | in        | `join`          | `roomId`, `role`                    |
//! | in        | `offer`         | `roomId`, `role`, `sdp`             |
//! | in        | `ice-candidate` | `roomId`, `candidate`               |
//! | in        | `stop`          | `roomId`                            |
//! | in / out  | `phase-change`  | `roomId`, anything else (verbatim)  |
//! | out       | `join-ack`      | `roomId`, `ok`, `error?`            |
//! | out       | `answer`        | `roomId`, `sdp`                     |
//! | out       | `ice-candidate` | `candidate`                         |
//! | out       | `peer-joined`   | `roomId`, `role`                    |
//! | out       | `peer-left`     | `roomId`, `role?`                   |
//! | out       | `stop`          | `roomId?`                           |
//!
//! A `join` that fails validation gets `join-ack{ok: false}`; any other
//! rejected frame gets `stop`, carrying the `roomId` when one was readable.

pub mod error;
pub mod ids;
pub mod message;

pub use error::ProtocolError;
pub use ids::{ConnectionId, Role, RoomId};
pub use message::{ClientMessage, IceCandidate, MessageKind, Rejection, ServerMessage};
