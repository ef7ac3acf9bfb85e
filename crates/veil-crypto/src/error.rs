//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Peer public key failed format validation or is not a usable point.
    #[error("Invalid peer key: {0}")]
    InvalidPeerKey(String),

    /// The derived secret is too short to key the envelope cipher.
    #[error("Shared secret too short: need at least {min} bytes, got {actual}")]
    WeakSecret { min: usize, actual: usize },

    /// A shared secret was already derived for this session.
    #[error("Shared secret already derived for this session")]
    AlreadyDerived,

    #[error("Decryption failed: {0}")]
    DecryptFailure(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Unknown cipher suite: {0}")]
    UnknownCipherSuite(String),
}
