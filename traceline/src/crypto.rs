//! Payload encryption
//!
//! Records are sealed with AES-256-GCM before leaving the host. The key is
//! derived from a configured passphrase via SHA-256; when no key is
//! configured a built-in fallback is used so the SDK still functions, but
//! that fallback is public knowledge and production deployments must
//! override it.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Fallback passphrase used when no encryption key is configured. Not a
/// secret.
pub const DEFAULT_ENCRYPTION_KEY: &str = "traceline-default-key";

/// Size of AES-GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Turns a serialized record into the opaque payload string sent on the wire
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext`, returning a self-contained printable payload
    fn seal(&self, plaintext: &[u8]) -> Result<String>;

    /// Reverse of [`Cipher::seal`]
    fn open(&self, sealed: &str) -> Result<Vec<u8>>;
}

/// AES-256-GCM cipher with a SHA-256-derived key
///
/// Payload layout: `base64(nonce || ciphertext)` with a fresh random 96-bit
/// nonce per call.
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    /// Derive the cipher key from a passphrase
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }
}

impl Cipher for AesGcmCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(payload))
    }

    fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let raw = STANDARD
            .decode(sealed)
            .map_err(|e| Error::Crypto(format!("invalid payload encoding: {}", e)))?;

        if raw.len() < NONCE_SIZE {
            return Err(Error::Crypto("payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Crypto(format!("decryption failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = AesGcmCipher::new("test-passphrase");
        let plaintext = br#"{"name":"session.started"}"#;

        let sealed = cipher.seal(plaintext).unwrap();
        let opened = cipher.open(&sealed).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_distinct_nonces() {
        let cipher = AesGcmCipher::new("test-passphrase");

        let a = cipher.seal(b"payload").unwrap();
        let b = cipher.seal(b"payload").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = AesGcmCipher::new("key-one");
        let other = AesGcmCipher::new("key-two");

        let sealed = cipher.seal(b"payload").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let cipher = AesGcmCipher::new("test-passphrase");
        let sealed = cipher.seal(b"payload").unwrap();

        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = STANDARD.encode(raw);

        assert!(cipher.open(&tampered).is_err());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let cipher = AesGcmCipher::new("test-passphrase");
        assert!(cipher.open("not base64 !!!").is_err());
        assert!(cipher.open("AAAA").is_err());
    }

    #[test]
    fn test_default_key_works() {
        let cipher = AesGcmCipher::new(DEFAULT_ENCRYPTION_KEY);
        let sealed = cipher.seal(b"x").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"x");
    }
}
