//! Inbound and outbound signaling messages
//!
//! Inbound text frames are parsed into [`ClientMessage`] with every required
//! field validated up front, so the coordinator only ever dispatches
//! well-formed variants. Anything rejected comes back as a [`Rejection`]
//! that knows which response the sender should get.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ProtocolError;
use super::ids::{Role, RoomId};

/// ICE candidate as exchanged with browsers (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Inbound message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Join,
    Offer,
    IceCandidate,
    Stop,
    PhaseChange,
}

impl MessageKind {
    /// Wire name of the message type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Offer => "offer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::Stop => "stop",
            MessageKind::PhaseChange => "phase-change",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `join-room` and `sdp-offer` are the names older kiosk clients send
        match s {
            "join" | "join-room" => Ok(MessageKind::Join),
            "offer" | "sdp-offer" => Ok(MessageKind::Offer),
            "ice-candidate" => Ok(MessageKind::IceCandidate),
            "stop" => Ok(MessageKind::Stop),
            "phase-change" => Ok(MessageKind::PhaseChange),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Presence announcement; never creates media resources
    Join { room_id: RoomId, role: Option<Role> },
    /// SDP offer for one role of a room
    Offer {
        room_id: RoomId,
        role: Role,
        sdp: String,
    },
    /// Trickled candidate for whichever role the sender is bound to
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidate,
    },
    /// Sender leaves the room
    Stop { room_id: RoomId },
    /// Application payload relayed verbatim to the other participant
    PhaseChange {
        room_id: RoomId,
        payload: Map<String, Value>,
    },
}

impl ClientMessage {
    /// Parse and validate a text frame
    ///
    /// Returns `Ok(None)` for messages that are dropped without a response:
    /// phase changes without a room and end-of-candidates markers.
    pub fn parse(text: &str) -> Result<Option<Self>, Rejection> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Rejection::new(None, None, ProtocolError::MalformedJson(e.to_string())))?;

        let Value::Object(mut fields) = value else {
            return Err(Rejection::new(
                None,
                None,
                ProtocolError::MalformedJson("expected a JSON object".into()),
            ));
        };

        // Read the room first so even an unusable type can be answered for it
        let room_id = match fields.remove("roomId") {
            Some(Value::String(id)) if !id.is_empty() => Some(RoomId::from(id)),
            _ => None,
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind
                .parse::<MessageKind>()
                .map_err(|e| Rejection::new(None, room_id.clone(), e))?,
            _ => {
                return Err(Rejection::new(
                    None,
                    room_id,
                    ProtocolError::MalformedJson("missing message type".into()),
                ))
            }
        };

        match kind {
            MessageKind::Join => {
                let room_id =
                    room_id.ok_or_else(|| Rejection::new(Some(kind), None, ProtocolError::MissingRoomId))?;
                let role = match fields.get("role") {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(
                        parse_role(value).map_err(|e| Rejection::new(Some(kind), Some(room_id.clone()), e))?,
                    ),
                };
                Ok(Some(ClientMessage::Join { room_id, role }))
            }
            MessageKind::Offer => {
                let room_id =
                    room_id.ok_or_else(|| Rejection::new(Some(kind), None, ProtocolError::MissingRoomId))?;
                let role = fields
                    .get("role")
                    .ok_or_else(|| ProtocolError::InvalidRole(String::new()))
                    .and_then(parse_role)
                    .map_err(|e| Rejection::new(Some(kind), Some(room_id.clone()), e))?;
                let sdp = match fields.remove("sdp") {
                    Some(Value::String(sdp)) if !sdp.is_empty() => sdp,
                    _ => {
                        return Err(Rejection::new(
                            Some(kind),
                            Some(room_id),
                            ProtocolError::MissingSdp,
                        ))
                    }
                };
                Ok(Some(ClientMessage::Offer { room_id, role, sdp }))
            }
            MessageKind::IceCandidate => {
                let room_id =
                    room_id.ok_or_else(|| Rejection::new(Some(kind), None, ProtocolError::MissingRoomId))?;
                let candidate = match fields.remove("candidate") {
                    Some(Value::String(line)) => Some(IceCandidate::new(line)),
                    Some(value @ Value::Object(_)) => serde_json::from_value::<IceCandidate>(value).ok(),
                    _ => None,
                };
                Ok(candidate
                    .filter(|c| !c.candidate.is_empty())
                    .map(|candidate| ClientMessage::IceCandidate { room_id, candidate }))
            }
            MessageKind::Stop => {
                let room_id =
                    room_id.ok_or_else(|| Rejection::new(Some(kind), None, ProtocolError::MissingRoomId))?;
                Ok(Some(ClientMessage::Stop { room_id }))
            }
            MessageKind::PhaseChange => Ok(room_id.map(|room_id| ClientMessage::PhaseChange {
                room_id,
                payload: fields,
            })),
        }
    }

    /// Type of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Join { .. } => MessageKind::Join,
            ClientMessage::Offer { .. } => MessageKind::Offer,
            ClientMessage::IceCandidate { .. } => MessageKind::IceCandidate,
            ClientMessage::Stop { .. } => MessageKind::Stop,
            ClientMessage::PhaseChange { .. } => MessageKind::PhaseChange,
        }
    }

    /// Room this message targets
    pub fn room_id(&self) -> &RoomId {
        match self {
            ClientMessage::Join { room_id, .. }
            | ClientMessage::Offer { room_id, .. }
            | ClientMessage::IceCandidate { room_id, .. }
            | ClientMessage::Stop { room_id }
            | ClientMessage::PhaseChange { room_id, .. } => room_id,
        }
    }
}

fn parse_role(value: &Value) -> Result<Role, ProtocolError> {
    match value {
        Value::String(role) => role.parse(),
        other => Err(ProtocolError::InvalidRole(other.to_string())),
    }
}

/// An inbound message that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Message type, if it could be determined
    pub kind: Option<MessageKind>,
    /// Room the message referred to, if present
    pub room_id: Option<RoomId>,
    /// What was wrong
    pub error: ProtocolError,
}

impl Rejection {
    fn new(kind: Option<MessageKind>, room_id: Option<RoomId>, error: ProtocolError) -> Self {
        Self {
            kind,
            room_id,
            error,
        }
    }

    /// Response owed to the sender
    ///
    /// `join` has an acknowledgement that carries the error; anything else
    /// is told to abandon the session with `stop`.
    pub fn response(&self) -> ServerMessage {
        match self.kind {
            Some(MessageKind::Join) => ServerMessage::JoinAck {
                room_id: self.room_id.clone(),
                ok: false,
                error: Some(self.error.to_string()),
            },
            _ => ServerMessage::Stop {
                room_id: self.room_id.clone(),
            },
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{} rejected: {}", kind, self.error),
            None => write!(f, "message rejected: {}", self.error),
        }
    }
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Acknowledges a `join`
    #[serde(rename_all = "camelCase")]
    JoinAck {
        room_id: Option<RoomId>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// SDP answer, unicast to the offerer
    #[serde(rename_all = "camelCase")]
    Answer { room_id: RoomId, sdp: String },
    /// Candidate discovered by the relay for the recipient's endpoint
    IceCandidate { candidate: IceCandidate },
    /// Another participant announced itself
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    /// Another participant's transport went away
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    /// Abandon the session
    #[serde(rename_all = "camelCase")]
    Stop { room_id: Option<RoomId> },
    /// Relayed application payload
    #[serde(rename_all = "camelCase")]
    PhaseChange {
        room_id: RoomId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> Result<Option<ClientMessage>, Rejection> {
        ClientMessage::parse(&value.to_string())
    }

    #[test]
    fn test_parse_offer() {
        let msg = parse(json!({"type": "offer", "roomId": "r1", "role": "callee", "sdp": "v=0"}))
            .unwrap()
            .unwrap();

        assert_eq!(
            msg,
            ClientMessage::Offer {
                room_id: "r1".into(),
                role: Role::Callee,
                sdp: "v=0".into(),
            }
        );
        assert_eq!(msg.kind(), MessageKind::Offer);
    }

    #[test]
    fn test_parse_legacy_names() {
        let join = parse(json!({"type": "join-room", "roomId": "r1", "role": "caller"}))
            .unwrap()
            .unwrap();
        assert_eq!(join.kind(), MessageKind::Join);

        let offer = parse(json!({"type": "sdp-offer", "roomId": "r1", "role": "caller", "sdp": "v=0"}))
            .unwrap()
            .unwrap();
        assert_eq!(offer.kind(), MessageKind::Offer);
    }

    #[test]
    fn test_join_without_role() {
        let msg = parse(json!({"type": "join", "roomId": "r1"})).unwrap().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                room_id: "r1".into(),
                role: None
            }
        );
    }

    #[test]
    fn test_join_without_room_is_acked_with_error() {
        let rejection = parse(json!({"type": "join", "role": "caller"})).unwrap_err();

        assert_eq!(rejection.error, ProtocolError::MissingRoomId);
        assert_eq!(
            rejection.response(),
            ServerMessage::JoinAck {
                room_id: None,
                ok: false,
                error: Some("no roomId".into()),
            }
        );
    }

    #[test]
    fn test_bad_offer_answers_with_stop() {
        let rejection = parse(json!({"type": "offer", "roomId": "r1", "role": "host", "sdp": "v=0"})).unwrap_err();
        assert_eq!(rejection.error, ProtocolError::InvalidRole("host".into()));
        assert_eq!(
            rejection.response(),
            ServerMessage::Stop {
                room_id: Some("r1".into())
            }
        );

        let rejection = parse(json!({"type": "offer", "roomId": "r1", "role": "caller"})).unwrap_err();
        assert_eq!(rejection.error, ProtocolError::MissingSdp);

        let rejection = parse(json!({"type": "offer", "roomId": "r1", "sdp": "v=0"})).unwrap_err();
        assert!(matches!(rejection.error, ProtocolError::InvalidRole(_)));
    }

    #[test]
    fn test_malformed_and_unknown() {
        let rejection = ClientMessage::parse("not json").unwrap_err();
        assert!(matches!(rejection.error, ProtocolError::MalformedJson(_)));
        assert_eq!(rejection.response(), ServerMessage::Stop { room_id: None });

        let rejection = parse(json!({"type": "dance", "roomId": "r1"})).unwrap_err();
        assert_eq!(rejection.error, ProtocolError::UnknownType("dance".into()));
        assert_eq!(
            rejection.response(),
            ServerMessage::Stop {
                room_id: Some("r1".into())
            }
        );

        let rejection = parse(json!({"roomId": "r1"})).unwrap_err();
        assert!(matches!(rejection.error, ProtocolError::MalformedJson(_)));
        assert_eq!(
            rejection.response(),
            ServerMessage::Stop {
                room_id: Some("r1".into())
            }
        );

        let rejection = parse(json!(["offer"])).unwrap_err();
        assert!(matches!(rejection.error, ProtocolError::MalformedJson(_)));
    }

    #[test]
    fn test_ice_candidate_forms() {
        let msg = parse(json!({
            "type": "ice-candidate",
            "roomId": "r1",
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }))
        .unwrap()
        .unwrap();

        let ClientMessage::IceCandidate { candidate, .. } = msg else {
            panic!("expected ice-candidate");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));

        let msg = parse(json!({"type": "ice-candidate", "roomId": "r1", "candidate": "candidate:2"}))
            .unwrap()
            .unwrap();
        assert!(matches!(msg, ClientMessage::IceCandidate { .. }));
    }

    #[test]
    fn test_ignored_messages() {
        // End-of-candidates marker
        assert_eq!(parse(json!({"type": "ice-candidate", "roomId": "r1", "candidate": null})).unwrap(), None);
        assert_eq!(
            parse(json!({"type": "ice-candidate", "roomId": "r1", "candidate": {"candidate": ""}})).unwrap(),
            None
        );
        assert_eq!(parse(json!({"type": "phase-change", "phase": "video"})).unwrap(), None);
    }

    #[test]
    fn test_stop_without_room() {
        let rejection = parse(json!({"type": "stop"})).unwrap_err();
        assert_eq!(rejection.error, ProtocolError::MissingRoomId);
        assert_eq!(rejection.response(), ServerMessage::Stop { room_id: None });
    }

    #[test]
    fn test_ice_candidate_without_room_answers_with_stop() {
        let rejection = parse(json!({"type": "ice-candidate", "candidate": "candidate:1"})).unwrap_err();
        assert_eq!(rejection.kind, Some(MessageKind::IceCandidate));
        assert_eq!(rejection.error, ProtocolError::MissingRoomId);
        assert_eq!(rejection.response(), ServerMessage::Stop { room_id: None });

        let rejection = parse(json!({"type": "ice-candidate", "roomId": "", "candidate": null})).unwrap_err();
        assert_eq!(rejection.error, ProtocolError::MissingRoomId);
    }

    #[test]
    fn test_stop_json_without_room() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Stop { room_id: None }).unwrap(),
            json!({"type": "stop", "roomId": null})
        );
    }

    #[test]
    fn test_phase_change_keeps_payload() {
        let msg = parse(json!({"type": "phase-change", "roomId": "r1", "phase": "confirm", "image": "data:image/png;base64,AAAA"}))
            .unwrap()
            .unwrap();

        let ClientMessage::PhaseChange { room_id, payload } = msg else {
            panic!("expected phase-change");
        };
        assert_eq!(room_id.as_str(), "r1");
        assert_eq!(payload.len(), 2);
        assert_eq!(payload["phase"], json!("confirm"));
    }

    #[test]
    fn test_server_message_json() {
        let answer = ServerMessage::Answer {
            room_id: "r1".into(),
            sdp: "v=0".into(),
        };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({"type": "answer", "roomId": "r1", "sdp": "v=0"})
        );

        let joined = ServerMessage::PeerJoined {
            room_id: "r1".into(),
            role: Some(Role::Callee),
        };
        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!({"type": "peer-joined", "roomId": "r1", "role": "callee"})
        );

        let candidate = ServerMessage::IceCandidate {
            candidate: IceCandidate::new("candidate:1"),
        };
        assert_eq!(
            serde_json::to_value(&candidate).unwrap(),
            json!({"type": "ice-candidate", "candidate": {"candidate": "candidate:1"}})
        );

        let mut payload = Map::new();
        payload.insert("phase".into(), json!("done"));
        let phase = ServerMessage::PhaseChange {
            room_id: "r1".into(),
            payload,
        };
        assert_eq!(
            serde_json::to_value(&phase).unwrap(),
            json!({"type": "phase-change", "roomId": "r1", "phase": "done"})
        );
    }
}
