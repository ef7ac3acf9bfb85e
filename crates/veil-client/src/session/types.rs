//! Session types shared by the state machines and the runner.

use std::time::Duration;

use veil_crypto::{CipherSuite, CryptoError};
use veil_proto::{ProtoError, RelayMessage, Role};

use super::ephemeral::{DEFAULT_SELF_DESTRUCT, EntryId};
use super::signaling::{CallId, MediaCommand, SignalingState};

/// Per-session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub cipher_suite: CipherSuite,
    pub self_destruct_after: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cipher_suite: CipherSuite::default(),
            self_destruct_after: DEFAULT_SELF_DESTRUCT,
        }
    }
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub origin: Origin,
    pub sender_id: String,
}

/// Requests from the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateRoom { duration_secs: u32 },
    JoinRoom { passcode: String },
    FindMatch,
    SendText { text: String, self_destruct: bool },
    StartCall,
    EndCall,
    /// Compare the code the peer read out against ours.
    VerifyCode { code: String },
    /// Leave normally. The runner closes the transport and does not reconnect.
    Close,
}

/// Something the session wants done outside itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Frame for the relay.
    Relay(RelayMessage),
    /// Step for the media stack.
    Media(MediaCommand),
    /// Notification for the user interface.
    Event(SessionEvent),
}

/// User-facing notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    RoomCreated {
        passcode: String,
        duration_secs: u32,
    },
    RoomJoined {
        passcode: String,
    },
    JoinRejected {
        reason: String,
    },
    MatchWaiting,
    MatchFound {
        room_id: String,
        role: Role,
    },
    PeerJoined,
    /// Key exchange finished; both sides should show the same code.
    SecureChannelReady {
        verification_code: String,
    },
    /// The peer's key was unusable. Encrypted traffic stays disabled.
    KeyExchangeFailed {
        reason: String,
    },
    /// Result of comparing a code from the peer with ours.
    CodeChecked {
        matches: bool,
    },
    MessageAppended {
        id: EntryId,
        message: ChatMessage,
        self_destruct: bool,
    },
    MessageEvicted {
        id: EntryId,
    },
    CountdownTick {
        remaining_secs: u64,
    },
    CallStateChanged {
        call_id: CallId,
        state: SignalingState,
    },
    SessionExpired {
        reason: String,
    },
    ProtocolError {
        reason: String,
    },
}

/// Caller errors and failures surfaced from lower layers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Secure channel not established")]
    NotKeyed,

    #[error("No active room")]
    NotInRoom,

    #[error("Operation requires the {required} role")]
    RoleMismatch { required: Role },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
