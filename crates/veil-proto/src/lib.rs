//! Veil relay protocol
//!
//! Typed frames multiplexed over the single relay channel.
//!
//! This crate contains:
//! - `RelayMessage`, the closed set of frame kinds exchanged with the relay
//! - The JSON frame codec (`encode` / `decode`) with a tolerant reader
//! - Wire-level validation for room durations and passcodes
//! - Signaling payloads that travel sealed inside envelopes

mod codec;
mod error;
mod message;
mod signal;
mod validate;

pub use codec::{Frame, decode, encode};
pub use error::{ProtoError, Result};
pub use message::{RelayMessage, Role, WireEnvelope};
pub use signal::{DescriptionKind, IceCandidate, SessionDescription};
pub use validate::{
    MAX_DURATION_SECS, MAX_PASSCODE_LEN, MIN_DURATION_SECS, normalize_passcode, validate_duration,
};
