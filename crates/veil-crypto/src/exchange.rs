//! Key exchange protocol logic.
//!
//! Implements relay-mediated P-521 ECDH between the two room peers. Each side
//! generates an ephemeral keypair per session, sends the uncompressed public
//! point through the relay, and derives the shared secret from the peer's point.

use p521::ecdh::EphemeralSecret;
use p521::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of an uncompressed SEC1 P-521 point: tag byte plus two 66-byte coordinates.
pub const PUBLIC_KEY_LEN: usize = 133;

/// Leading byte of an uncompressed SEC1 point.
pub const UNCOMPRESSED_TAG: u8 = 0x04;

/// Minimum usable shared secret length; the envelope key is its first 32 bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Hex characters shown to users for out-of-band secret comparison.
const VERIFICATION_CODE_LEN: usize = 8;

/// Validation applied to a peer's public key bytes before derivation.
///
/// The default [`FormatOnly`] check looks at length and tag byte only. A
/// stricter policy can be plugged in without touching callers.
pub trait PeerKeyValidator: Send + Sync {
    fn validate(&self, peer_public: &[u8]) -> Result<(), CryptoError>;
}

/// Accepts any byte string of the uncompressed point size starting with `0x04`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOnly;

impl PeerKeyValidator for FormatOnly {
    fn validate(&self, peer_public: &[u8]) -> Result<(), CryptoError> {
        if peer_public.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidPeerKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                peer_public.len()
            )));
        }
        if peer_public[0] != UNCOMPRESSED_TAG {
            return Err(CryptoError::InvalidPeerKey(format!(
                "expected leading byte 0x04, got {:#04x}",
                peer_public[0]
            )));
        }
        Ok(())
    }
}

/// Ephemeral P-521 keypair owned by one session. The secret scalar is
/// zeroized when dropped.
pub struct KeyPair {
    secret: EphemeralSecret,
    public: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self { secret, public }
    }

    /// Public point in uncompressed SEC1 encoding (`0x04 || X || Y`).
    pub fn export_public(&self) -> Vec<u8> {
        self.public.clone()
    }

    /// Derive the shared secret with the default format-only peer key check.
    pub fn derive_shared(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        self.derive_shared_with(peer_public, &FormatOnly)
    }

    /// Derive the shared secret after running `validator` on the peer key.
    pub fn derive_shared_with(
        &self,
        peer_public: &[u8],
        validator: &dyn PeerKeyValidator,
    ) -> Result<SharedSecret, CryptoError> {
        validator.validate(peer_public)?;
        // The curve library refuses points it cannot decode, so off-curve
        // input still ends here as InvalidPeerKey.
        let peer = p521::PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidPeerKey("point could not be decoded".into()))?;
        let shared = self.secret.diffie_hellman(&peer);
        SharedSecret::new(shared.raw_secret_bytes().to_vec())
    }
}

/// Raw ECDH output for one session. Never serialized; zeroized on drop.
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

impl SharedSecret {
    /// Wrap derived bytes, rejecting secrets too short to key the cipher.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() < MIN_SECRET_LEN {
            return Err(CryptoError::WeakSecret {
                min: MIN_SECRET_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The symmetric envelope key: the first 32 bytes of the secret.
    pub fn symmetric_key(&self) -> Zeroizing<[u8; MIN_SECRET_LEN]> {
        let mut key = Zeroizing::new([0u8; MIN_SECRET_LEN]);
        key.copy_from_slice(&self.0[..MIN_SECRET_LEN]);
        key
    }

    /// Short code both peers can read aloud to confirm they derived the same
    /// secret: first 8 hex characters of SHA-256 over the secret.
    pub fn verification_code(&self) -> String {
        let digest = Sha256::digest(self.0.as_slice());
        let mut code = hex::encode(digest);
        code.truncate(VERIFICATION_CODE_LEN);
        code
    }
}

/// Per-session key exchange. Holds the ephemeral keypair until the single
/// allowed derivation succeeds, then drops it.
pub struct KeyExchangeState {
    keypair: Option<KeyPair>,
    public: Vec<u8>,
    validator: Box<dyn PeerKeyValidator>,
}

impl Default for KeyExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeState")
            .field("public", &hex::encode(&self.public))
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl KeyExchangeState {
    /// Start a new key exchange by generating an ephemeral keypair.
    pub fn new() -> Self {
        Self::with_validator(Box::new(FormatOnly))
    }

    /// Start a new key exchange with a custom peer key check.
    pub fn with_validator(validator: Box<dyn PeerKeyValidator>) -> Self {
        let keypair = KeyPair::generate();
        let public = keypair.export_public();
        Self {
            keypair: Some(keypair),
            public,
            validator,
        }
    }

    /// Our public key bytes to send to the peer.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Whether the shared secret has already been derived.
    pub const fn is_complete(&self) -> bool {
        self.keypair.is_none()
    }

    /// Derive the shared secret from the peer's public key.
    ///
    /// Succeeds at most once. A failed attempt leaves the keypair in place.
    pub fn complete(&mut self, peer_public_bytes: &[u8]) -> Result<SharedSecret, CryptoError> {
        let keypair = self.keypair.as_ref().ok_or(CryptoError::AlreadyDerived)?;
        let secret = keypair.derive_shared_with(peer_public_bytes, self.validator.as_ref())?;
        self.keypair = None;
        Ok(secret)
    }
}

/// Run both halves of a key exchange in-process (for tests).
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn perform_key_exchange() -> (SharedSecret, SharedSecret) {
    let mut initiator = KeyExchangeState::new();
    let mut responder = KeyExchangeState::new();
    let initiator_pub = initiator.public_bytes().to_vec();
    let responder_pub = responder.public_bytes().to_vec();
    let a = initiator
        .complete(&responder_pub)
        .expect("initiator derivation");
    let b = responder
        .complete(&initiator_pub)
        .expect("responder derivation");
    (a, b)
}

/// Compare two strings in constant time.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
