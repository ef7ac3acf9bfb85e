//! Envelope encryption for relay payloads.
//!
//! Every sealed payload gets a fresh random 12-byte nonce. The default suite is
//! plain ChaCha20 (IETF variant, block counter 0), which the other peer speaks
//! on the wire; it provides confidentiality only. `ChaCha20Poly1305` adds an
//! authentication tag and must be selected by both peers.

use std::fmt;
use std::str::FromStr;

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::exchange::{MIN_SECRET_LEN, SharedSecret};

/// Nonce size for both suites.
pub const NONCE_SIZE: usize = 12;

/// Sealed payload as produced by [`EnvelopeCipher::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Parse the lowercase hex pair carried in relay frames.
    pub fn from_hex(nonce: &str, content: &str) -> Result<Self, CryptoError> {
        let nonce_bytes = hex::decode(nonce)
            .map_err(|e| CryptoError::DecryptFailure(format!("nonce is not hex: {e}")))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::DecryptFailure(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            ))
        })?;
        let ciphertext = hex::decode(content)
            .map_err(|e| CryptoError::DecryptFailure(format!("content is not hex: {e}")))?;
        Ok(Self { nonce, ciphertext })
    }

    /// Encode as `(nonce, content)` lowercase hex strings.
    pub fn to_hex(&self) -> (String, String) {
        (hex::encode(self.nonce), hex::encode(&self.ciphertext))
    }
}

/// Symmetric construction used for envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    /// Unauthenticated stream cipher. Tampering is not detected.
    #[default]
    #[serde(rename = "chacha20")]
    ChaCha20,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherSuite {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChaCha20 => "chacha20",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::ChaCha20Poly1305)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chacha20" => Ok(Self::ChaCha20),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(CryptoError::UnknownCipherSuite(other.to_string())),
        }
    }
}

enum Inner {
    Stream(Zeroizing<[u8; MIN_SECRET_LEN]>),
    Aead(Box<ChaCha20Poly1305>),
}

/// Seals and opens envelopes with the key of one session.
pub struct EnvelopeCipher {
    suite: CipherSuite,
    inner: Inner,
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    /// Key a cipher from the session's shared secret.
    pub fn new(secret: &SharedSecret, suite: CipherSuite) -> Result<Self, CryptoError> {
        Self::from_key(secret.symmetric_key().as_slice(), suite)
    }

    /// Key a cipher from raw key bytes; the key must be exactly 32 bytes.
    pub fn from_key(key: &[u8], suite: CipherSuite) -> Result<Self, CryptoError> {
        if key.len() != MIN_SECRET_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: MIN_SECRET_LEN,
                actual: key.len(),
            });
        }
        let inner = match suite {
            CipherSuite::ChaCha20 => {
                let mut owned = Zeroizing::new([0u8; MIN_SECRET_LEN]);
                owned.copy_from_slice(key);
                Inner::Stream(owned)
            }
            CipherSuite::ChaCha20Poly1305 => {
                let aead = ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
                    CryptoError::InvalidKeyLength {
                        expected: MIN_SECRET_LEN,
                        actual: key.len(),
                    }
                })?;
                Inner::Aead(Box::new(aead))
            }
        };
        Ok(Self { suite, inner })
    }

    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = match &self.inner {
            Inner::Stream(key) => {
                let mut buf = plaintext.to_vec();
                apply_stream(key, &nonce, &mut buf)?;
                buf
            }
            Inner::Aead(aead) => aead
                .encrypt(Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?,
        };

        Ok(EncryptedEnvelope { nonce, ciphertext })
    }

    /// Decrypt an envelope. With the stream suite any ciphertext "opens";
    /// garbage in yields garbage out.
    pub fn open(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        match &self.inner {
            Inner::Stream(key) => {
                let mut buf = envelope.ciphertext.clone();
                apply_stream(key, &envelope.nonce, &mut buf)?;
                Ok(buf)
            }
            Inner::Aead(aead) => aead
                .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
                .map_err(|_| {
                    CryptoError::DecryptFailure("authentication tag mismatch".into())
                }),
        }
    }
}

fn apply_stream(
    key: &[u8; MIN_SECRET_LEN],
    nonce: &[u8; NONCE_SIZE],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    let mut cipher = ChaCha20::new_from_slices(key, nonce)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    cipher.apply_keystream(buf);
    Ok(())
}

/// Two ciphers keyed from a fresh in-process key exchange.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn test_cipher_pair(suite: CipherSuite) -> (EnvelopeCipher, EnvelopeCipher) {
    let (a, b) = crate::exchange::perform_key_exchange();
    (
        EnvelopeCipher::new(&a, suite).expect("cipher a"),
        EnvelopeCipher::new(&b, suite).expect("cipher b"),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn stream_round_trip() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20);
        let sealed = a.seal(b"hello, peer").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"hello, peer".len());
        assert_ne!(sealed.ciphertext, b"hello, peer");
        assert_eq!(b.open(&sealed).unwrap(), b"hello, peer");
    }

    #[test]
    fn aead_round_trip() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20Poly1305);
        let sealed = a.seal(b"authenticated").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"authenticated".len() + 16);
        assert_eq!(b.open(&sealed).unwrap(), b"authenticated");
    }

    #[test]
    fn empty_payload_round_trips() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20);
        let sealed = a.seal(b"").unwrap();
        assert!(sealed.ciphertext.is_empty());
        assert!(b.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn stream_tampering_goes_undetected() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20);
        let mut sealed = a.seal(b"pay 10").unwrap();
        sealed.ciphertext[5] ^= 0x01;
        let opened = b.open(&sealed).unwrap();
        assert_ne!(opened, b"pay 10");
        assert_eq!(&opened[..5], b"pay 1");
    }

    #[test]
    fn aead_rejects_tampering() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20Poly1305);
        let mut sealed = a.seal(b"pay 10").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            b.open(&sealed),
            Err(CryptoError::DecryptFailure(_))
        ));
    }

    #[test]
    fn wrong_key_does_not_recover_plaintext() {
        let (a, _) = test_cipher_pair(CipherSuite::ChaCha20);
        let (_, other) = test_cipher_pair(CipherSuite::ChaCha20);
        let sealed = a.seal(b"secret message").unwrap();
        assert_ne!(other.open(&sealed).unwrap(), b"secret message");
    }

    #[test]
    fn nonces_are_fresh() {
        let (a, _) = test_cipher_pair(CipherSuite::ChaCha20);
        let nonces: HashSet<_> = (0..256).map(|_| a.seal(b"x").unwrap().nonce).collect();
        assert_eq!(nonces.len(), 256);
    }

    #[test]
    fn known_keystream_vector() {
        // RFC 8439 appendix A.1, test vector 1: zero key, zero nonce, counter 0.
        let key = [0u8; 32];
        let cipher = EnvelopeCipher::from_key(&key, CipherSuite::ChaCha20).unwrap();
        let envelope = EncryptedEnvelope {
            nonce: [0u8; NONCE_SIZE],
            ciphertext: vec![0u8; 4],
        };
        assert_eq!(
            hex::encode(cipher.open(&envelope).unwrap()),
            "76b8e0ad"
        );
    }

    #[test]
    fn hex_form_round_trips() {
        let (a, b) = test_cipher_pair(CipherSuite::ChaCha20);
        let sealed = a.seal(b"over the wire").unwrap();
        let (nonce, content) = sealed.to_hex();
        assert_eq!(nonce.len(), 24);
        let parsed = EncryptedEnvelope::from_hex(&nonce, &content).unwrap();
        assert_eq!(b.open(&parsed).unwrap(), b"over the wire");
    }

    #[test]
    fn bad_hex_is_decrypt_failure() {
        assert!(matches!(
            EncryptedEnvelope::from_hex("zz", "00"),
            Err(CryptoError::DecryptFailure(_))
        ));
        assert!(matches!(
            EncryptedEnvelope::from_hex("0011", "00"),
            Err(CryptoError::DecryptFailure(_))
        ));
        assert!(matches!(
            EncryptedEnvelope::from_hex(&"00".repeat(12), "0g"),
            Err(CryptoError::DecryptFailure(_))
        ));
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(
            EnvelopeCipher::from_key(&[0u8; 16], CipherSuite::ChaCha20),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn suite_parses_from_config_names() {
        assert_eq!("chacha20".parse::<CipherSuite>().unwrap(), CipherSuite::ChaCha20);
        assert_eq!(
            "ChaCha20-Poly1305".parse::<CipherSuite>().unwrap(),
            CipherSuite::ChaCha20Poly1305
        );
        assert!("aes-gcm".parse::<CipherSuite>().is_err());
        let json = serde_json::to_string(&CipherSuite::ChaCha20Poly1305).unwrap();
        assert_eq!(json, "\"chacha20-poly1305\"");
    }

    #[test]
    fn only_the_aead_suite_is_authenticated() {
        assert!(!CipherSuite::default().is_authenticated());
        assert!(CipherSuite::ChaCha20Poly1305.is_authenticated());
    }
}
