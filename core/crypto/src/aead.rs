//! Authenticated encryption using AES-256-GCM.
//!
//! Every seal draws a fresh 96-bit nonce from the OS random source. The
//! 16-byte authentication tag is appended to the ciphertext.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::keys::VaultKey;
use notevault_common::{Error, Result};

/// Nonce size for AES-256-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// A 96-bit AES-GCM nonce.
///
/// Serialized as standard base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Draw a nonce from the OS random source.
    pub fn generate() -> Self {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut bytes = [0u8; NONCE_SIZE];
        bytes.copy_from_slice(&nonce);
        Self(bytes)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice that must be exactly `NONCE_SIZE` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; NONCE_SIZE] = bytes.try_into().map_err(|_| {
            Error::Serialization(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Serialization(format!("Invalid nonce encoding: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_base64())
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Output of a seal: ciphertext with tag appended, and the nonce used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Nonce,
}

/// Encrypt plaintext under a fresh random nonce.
///
/// # Postconditions
/// - `ciphertext.len() == plaintext.len() + TAG_SIZE`
/// - The nonce is never reused by a later call
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<Sealed> {
    let nonce = Nonce::generate();
    let ciphertext = seal_with_nonce(key, &nonce, plaintext)?;
    Ok(Sealed { ciphertext, nonce })
}

/// Decrypt and authenticate.
///
/// # Errors
/// - `AuthenticationFailed` on a wrong key, any modified byte, a truncated
///   ciphertext or a nonce of the wrong length. No partial plaintext is
///   ever returned.
pub fn open(key: &VaultKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(Error::AuthenticationFailed);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthenticationFailed)
}

/// Encrypt with a caller-chosen nonce.
///
/// Only reachable inside the crate; every public path goes through `seal`.
fn seal_with_nonce(key: &VaultKey, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use std::collections::HashSet;

    fn key(byte: u8) -> VaultKey {
        VaultKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = key(42);
        let sealed = seal(&key, b"Hello, World!").unwrap();
        let opened = open(&key, &sealed.ciphertext, sealed.nonce.as_bytes()).unwrap();

        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn test_ciphertext_size() {
        let key = key(42);
        let plaintext = b"Test message";

        let sealed = seal(&key, plaintext).unwrap();

        assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_nonce_unique_across_10k_seals() {
        let key = key(42);
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let sealed = seal(&key, b"same plaintext").unwrap();
            assert!(seen.insert(sealed.nonce));
        }

        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&key(1), b"Secret data").unwrap();
        let result = open(&key(2), &sealed.ciphertext, sealed.nonce.as_bytes());

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_every_flipped_bit_fails() {
        let key = key(42);
        let sealed = seal(&key, b"Important").unwrap();

        for i in 0..sealed.ciphertext.len() * 8 {
            let mut tampered = sealed.ciphertext.clone();
            tampered[i / 8] ^= 1 << (i % 8);
            let result = open(&key, &tampered, sealed.nonce.as_bytes());
            assert!(matches!(result, Err(Error::AuthenticationFailed)));
        }
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = key(42);
        let sealed = seal(&key, b"Important").unwrap();
        let mut nonce = *sealed.nonce.as_bytes();
        nonce[0] ^= 0xFF;

        assert!(matches!(
            open(&key, &sealed.ciphertext, &nonce),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_short_inputs_fail_closed() {
        let key = key(42);
        assert!(matches!(
            open(&key, &[0u8; TAG_SIZE - 1], &[0u8; NONCE_SIZE]),
            Err(Error::AuthenticationFailed)
        ));
        assert!(matches!(
            open(&key, &[0u8; 32], &[0u8; 8]),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = key(42);
        let sealed = seal(&key, b"").unwrap();

        assert_eq!(sealed.ciphertext.len(), TAG_SIZE);
        assert!(open(&key, &sealed.ciphertext, sealed.nonce.as_bytes())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_nonce_base64_serde() {
        let nonce = Nonce::from_bytes([9u8; NONCE_SIZE]);
        let json = serde_json::to_string(&nonce).unwrap();
        assert_eq!(json, "\"CQkJCQkJCQkJCQkJ\"");

        let back: Nonce = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nonce);
    }

    #[test]
    fn test_nonce_wrong_length_rejected() {
        assert!(Nonce::from_base64("AAAA").is_err());
        assert!(serde_json::from_str::<Nonce>("\"AAAA\"").is_err());
    }
}
