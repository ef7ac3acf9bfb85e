//! JSON frame codec for the relay channel.
//!
//! Implements a tolerant reader: unknown fields are ignored and unknown tags
//! are surfaced as `Frame::Unknown` so the caller can skip them.

use serde_json::Value;

use crate::error::{ProtoError, Result};
use crate::message::RelayMessage;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(RelayMessage),
    /// Well-formed frame with a tag this version does not know. Ignored, not fatal.
    Unknown { tag: String },
}

/// Encode a message into a single wire frame.
pub fn encode(msg: &RelayMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(ProtoError::Encode)
}

/// Decode a single wire frame.
pub fn decode(frame: &str) -> Result<Frame> {
    let raw: Value = serde_json::from_str(frame)
        .map_err(|e| ProtoError::MalformedMessage(format!("invalid JSON: {e}")))?;

    let tag = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtoError::MalformedMessage("Missing 'type' field".into()))?;

    if !RelayMessage::is_known_tag(tag) {
        return Ok(Frame::Unknown {
            tag: tag.to_string(),
        });
    }

    let tag = tag.to_string();
    serde_json::from_value(raw)
        .map(Frame::Message)
        .map_err(|e| ProtoError::MalformedMessage(format!("{tag}: {e}")))
}
