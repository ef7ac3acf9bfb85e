//! Frame kinds exchanged with the relay.

use serde::{Deserialize, Serialize};

/// Role of a peer within a room. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Room creator, or the side the matchmaker picked to lead. Starts the key
    /// exchange and is the only side allowed to place a call.
    #[serde(alias = "host")]
    Initiator,
    /// Joiner side. Answers key exchange and call offers.
    #[serde(alias = "joiner")]
    Responder,
}

impl Role {
    /// The opposite role.
    pub const fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Responder => "responder",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sealed payload as it travels on the wire: hex-encoded nonce and ciphertext.
///
/// The relay forwards this untouched. Parsing the hex is left to the cipher so
/// that a structurally broken envelope surfaces as a decrypt failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub nonce: String,
    pub content: String,
}

/// Every frame kind carried over the relay channel.
///
/// Encoded as a JSON object with a snake_case `type` tag and camelCase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayMessage {
    /// Initiator's ephemeral public key (uncompressed SEC1 point).
    KeyExchangeInit {
        #[serde(with = "base64_bytes")]
        public_key: Vec<u8>,
    },
    /// Responder's ephemeral public key, sent in reply to `KeyExchangeInit`.
    KeyExchangeAck {
        #[serde(with = "base64_bytes")]
        public_key: Vec<u8>,
    },
    /// Encrypted chat text.
    ChatText {
        envelope: WireEnvelope,
        #[serde(default)]
        self_destruct: bool,
        sender_id: String,
    },
    SignalOffer {
        envelope: WireEnvelope,
    },
    SignalAnswer {
        envelope: WireEnvelope,
    },
    SignalCandidate {
        envelope: WireEnvelope,
    },
    /// Ask the room authority for a new passcode-addressed room.
    RoomCreate {
        duration_seconds: u32,
    },
    RoomCreated {
        passcode: String,
        duration_seconds: u32,
    },
    RoomJoin {
        passcode: String,
    },
    RoomJoinResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The joiner arrived in a room this side created.
    PeerJoined,
    MatchRequest,
    MatchWaiting,
    MatchFound {
        room_id: String,
        assigned_role: Role,
    },
    /// Authoritative end of the session, regardless of the local countdown.
    SessionExpired {
        #[serde(default)]
        reason: String,
    },
    ProtocolError {
        #[serde(default)]
        reason: String,
    },
}

impl RelayMessage {
    /// Every tag this crate understands.
    pub const TAGS: &'static [&'static str] = &[
        "key_exchange_init",
        "key_exchange_ack",
        "chat_text",
        "signal_offer",
        "signal_answer",
        "signal_candidate",
        "room_create",
        "room_created",
        "room_join",
        "room_join_result",
        "peer_joined",
        "match_request",
        "match_waiting",
        "match_found",
        "session_expired",
        "protocol_error",
    ];

    /// Wire tag of this message.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::KeyExchangeInit { .. } => "key_exchange_init",
            Self::KeyExchangeAck { .. } => "key_exchange_ack",
            Self::ChatText { .. } => "chat_text",
            Self::SignalOffer { .. } => "signal_offer",
            Self::SignalAnswer { .. } => "signal_answer",
            Self::SignalCandidate { .. } => "signal_candidate",
            Self::RoomCreate { .. } => "room_create",
            Self::RoomCreated { .. } => "room_created",
            Self::RoomJoin { .. } => "room_join",
            Self::RoomJoinResult { .. } => "room_join_result",
            Self::PeerJoined => "peer_joined",
            Self::MatchRequest => "match_request",
            Self::MatchWaiting => "match_waiting",
            Self::MatchFound { .. } => "match_found",
            Self::SessionExpired { .. } => "session_expired",
            Self::ProtocolError { .. } => "protocol_error",
        }
    }

    pub fn is_known_tag(tag: &str) -> bool {
        Self::TAGS.contains(&tag)
    }

    /// Whether this frame carries a sealed payload that must be opened before use.
    pub const fn is_encrypted(&self) -> bool {
        matches!(
            self,
            Self::ChatText { .. }
                | Self::SignalOffer { .. }
                | Self::SignalAnswer { .. }
                | Self::SignalCandidate { .. }
        )
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn one_of_each() -> Vec<RelayMessage> {
        let envelope = WireEnvelope {
            nonce: "00".repeat(12),
            content: "abcd".into(),
        };
        vec![
            RelayMessage::KeyExchangeInit {
                public_key: vec![4; 133],
            },
            RelayMessage::KeyExchangeAck {
                public_key: vec![4; 133],
            },
            RelayMessage::ChatText {
                envelope: envelope.clone(),
                self_destruct: true,
                sender_id: "a".into(),
            },
            RelayMessage::SignalOffer {
                envelope: envelope.clone(),
            },
            RelayMessage::SignalAnswer {
                envelope: envelope.clone(),
            },
            RelayMessage::SignalCandidate { envelope },
            RelayMessage::RoomCreate {
                duration_seconds: 120,
            },
            RelayMessage::RoomCreated {
                passcode: "ABC123".into(),
                duration_seconds: 120,
            },
            RelayMessage::RoomJoin {
                passcode: "ABC123".into(),
            },
            RelayMessage::RoomJoinResult {
                success: false,
                error: Some("Room not found".into()),
            },
            RelayMessage::PeerJoined,
            RelayMessage::MatchRequest,
            RelayMessage::MatchWaiting,
            RelayMessage::MatchFound {
                room_id: "r1".into(),
                assigned_role: Role::Responder,
            },
            RelayMessage::SessionExpired {
                reason: "timeout".into(),
            },
            RelayMessage::ProtocolError {
                reason: "bad".into(),
            },
        ]
    }

    #[test]
    fn every_variant_tag_is_listed() {
        let messages = one_of_each();
        assert_eq!(messages.len(), RelayMessage::TAGS.len());
        for msg in &messages {
            assert!(RelayMessage::is_known_tag(msg.tag()), "{}", msg.tag());
            let value = serde_json::to_value(msg).unwrap();
            assert_eq!(value["type"], msg.tag());
        }
    }

    #[test]
    fn fields_are_camel_case() {
        let value = serde_json::to_value(RelayMessage::MatchFound {
            room_id: "r1".into(),
            assigned_role: Role::Initiator,
        })
        .unwrap();
        assert_eq!(value["roomId"], "r1");
        assert_eq!(value["assignedRole"], "initiator");

        let value = serde_json::to_value(RelayMessage::RoomCreate {
            duration_seconds: 60,
        })
        .unwrap();
        assert_eq!(value["durationSeconds"], 60);
    }

    #[test]
    fn legacy_role_names_accepted() {
        let msg: RelayMessage =
            serde_json::from_str(r#"{"type":"match_found","roomId":"x","assignedRole":"host"}"#)
                .unwrap();
        assert_eq!(
            msg,
            RelayMessage::MatchFound {
                room_id: "x".into(),
                assigned_role: Role::Initiator
            }
        );
    }

    #[test]
    fn public_key_is_base64() {
        let value = serde_json::to_value(RelayMessage::KeyExchangeInit {
            public_key: vec![0x04, 0xff],
        })
        .unwrap();
        assert_eq!(value["publicKey"], "BP8=");
    }

    #[test]
    fn only_payload_frames_are_encrypted() {
        for msg in one_of_each() {
            let expected = matches!(
                msg.tag(),
                "chat_text" | "signal_offer" | "signal_answer" | "signal_candidate"
            );
            assert_eq!(msg.is_encrypted(), expected, "{}", msg.tag());
        }
    }

    #[test]
    fn role_peer_is_complementary() {
        assert_eq!(Role::Initiator.peer(), Role::Responder);
        assert_eq!(Role::Responder.peer(), Role::Initiator);
    }
}
