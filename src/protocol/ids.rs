//! Identifiers for rooms, roles and connections

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// Transport connection identifier, assigned when a client connects
pub type ConnectionId = u64;

/// Opaque room identifier supplied by clients
///
/// The coordinator never interprets it; it only keys rooms and presence
/// groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One of the two fixed participant slots in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Party that initiates the call
    Caller,
    /// Party that receives the call
    Callee,
}

impl Role {
    /// Both roles, caller first
    pub const ALL: [Role; 2] = [Role::Caller, Role::Callee];

    /// The opposite role
    pub fn other(self) -> Self {
        match self {
            Role::Caller => Role::Callee,
            Role::Callee => Role::Caller,
        }
    }

    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Caller => "caller",
            Role::Callee => "callee",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Caller => 0,
            Role::Callee => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caller" => Ok(Role::Caller),
            "callee" => Ok(Role::Callee),
            other => Err(ProtocolError::InvalidRole(other.to_string())),
        }
    }
}
