//! Signaling payloads carried sealed inside `signal_*` envelopes.
//!
//! Shapes follow the JSON form browsers use for session descriptions and ICE
//! candidates, so a media stack can consume them directly.

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Local or remote media description (SDP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtoError::MalformedMessage(format!("session description: {e}")))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtoError::Encode)
    }
}

/// A single ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Parse a candidate, rejecting ones a media stack would refuse: a
    /// candidate must name its media section by id or by index.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let candidate: Self = serde_json::from_slice(bytes)
            .map_err(|e| ProtoError::MalformedMessage(format!("ice candidate: {e}")))?;
        if candidate.sdp_mid.is_none() && candidate.sdp_mline_index.is_none() {
            return Err(ProtoError::MalformedMessage(
                "ice candidate without sdpMid or sdpMLineIndex".into(),
            ));
        }
        Ok(candidate)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtoError::Encode)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_browser_shape() {
        let json = SessionDescription::offer("v=0").to_json().unwrap();
        assert_eq!(json, br#"{"type":"offer","sdp":"v=0"}"#);
        let parsed = SessionDescription::from_json(br#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(parsed.kind, DescriptionKind::Answer);
    }

    #[test]
    fn candidate_parses_browser_fields() {
        let c = IceCandidate::from_json(
            br#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
    }

    #[test]
    fn candidate_without_media_section_is_malformed() {
        assert!(IceCandidate::from_json(br#"{"candidate":"candidate:1"}"#).is_err());
    }

    #[test]
    fn candidate_garbage_is_malformed() {
        assert!(IceCandidate::from_json(b"\x00\x01garbage").is_err());
    }
}
