//! Veil end-to-end encryption library
//!
//! Cryptographic primitives for the two peers of a Veil room. The relay only
//! ever sees public keys and sealed envelopes.
//!
//! ## Crypto primitives
//!
//! - **Key exchange**: ephemeral P-521 ECDH per session, uncompressed SEC1 points on the wire
//! - **Key**: first 32 bytes of the raw shared secret
//! - **Envelopes**: ChaCha20 with a random 12-byte nonce per payload, or opt-in ChaCha20-Poly1305

pub mod envelope;
pub mod error;
pub mod exchange;

pub use envelope::{CipherSuite, EncryptedEnvelope, EnvelopeCipher, NONCE_SIZE};
pub use error::CryptoError;
pub use exchange::{
    FormatOnly, KeyExchangeState, KeyPair, MIN_SECRET_LEN, PUBLIC_KEY_LEN, PeerKeyValidator,
    SharedSecret, constant_time_str_eq,
};
