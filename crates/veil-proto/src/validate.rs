//! Caller-side validation of plaintext control fields.
//!
//! Out-of-range values are rejected before a frame is built; they are never
//! sent to the room authority.

use crate::error::{ProtoError, Result};

/// Shortest room lifetime the authority accepts, in seconds.
pub const MIN_DURATION_SECS: u32 = 60;

/// Longest room lifetime the authority accepts, in seconds.
pub const MAX_DURATION_SECS: u32 = 3600;

/// Passcodes are at most this many characters.
pub const MAX_PASSCODE_LEN: usize = 6;

/// Check a requested room duration.
pub fn validate_duration(secs: u32) -> Result<u32> {
    if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(ProtoError::DurationOutOfRange(secs))
    }
}

/// Trim and uppercase a passcode typed by the user.
pub fn normalize_passcode(input: &str) -> Result<String> {
    let code = input.trim().to_uppercase();
    if code.is_empty() {
        return Err(ProtoError::InvalidPasscode("passcode is empty".into()));
    }
    if code.chars().count() > MAX_PASSCODE_LEN {
        return Err(ProtoError::InvalidPasscode(format!(
            "passcode longer than {MAX_PASSCODE_LEN} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ProtoError::InvalidPasscode(
            "passcode must be alphanumeric".into(),
        ));
    }
    Ok(code)
}
