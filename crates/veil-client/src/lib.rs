//! Veil Client Library
//!
//! Core functionality for a Veil peer:
//! - Secure session protocol: key exchange, sealed chat and call signaling
//! - Room lifecycle with countdown and authoritative expiry
//! - Ephemeral message log with local self-destruct
//! - Reconnecting relay tunnel with one fresh session per connection

pub mod session;
pub mod tunnel;
