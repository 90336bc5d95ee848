//! Per-connection state stored in the registry

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, Role, RoomId, ServerMessage};

/// Entry for a single client connection
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Connection identifier
    pub id: ConnectionId,

    /// Remote address, when the transport knows it
    pub peer_addr: Option<SocketAddr>,

    /// When the connection was registered
    pub connected_at: Instant,

    /// Presence groups this connection belongs to
    pub rooms: HashSet<RoomId>,

    /// Role this connection is bound to, per room
    pub bindings: HashMap<RoomId, Role>,

    /// Outbound queue drained by the transport writer
    pub(super) outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionEntry {
    pub(super) fn new(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            rooms: HashSet::new(),
            bindings: HashMap::new(),
            outbound,
        }
    }

    /// Queue a message; false if the transport has gone away
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.outbound.send(msg).is_ok()
    }

    /// Every room this connection joined or is bound in, sorted
    pub fn touched_rooms(&self) -> BTreeSet<RoomId> {
        self.rooms
            .iter()
            .chain(self.bindings.keys())
            .cloned()
            .collect()
    }

    /// Time since the connection was registered
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
