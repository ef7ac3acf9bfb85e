//! Error types for the relay protocol.

use thiserror::Error;

/// Result type alias using `ProtoError`.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Errors produced while encoding, decoding or validating frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The frame could not be parsed into a known message shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Room duration outside the accepted range.
    #[error("Session duration {0}s is outside {min}..={max}s", min = crate::MIN_DURATION_SECS, max = crate::MAX_DURATION_SECS)]
    DurationOutOfRange(u32),

    /// Passcode empty, too long, or containing unsupported characters.
    #[error("Invalid passcode: {0}")]
    InvalidPasscode(String),

    /// Serializing an outbound frame failed.
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}
