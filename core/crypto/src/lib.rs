//! Cryptographic primitives for NoteVault.
//!
//! This module provides:
//! - Key derivation from a vault code using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using AES-256-GCM
//! - Text and file envelopes with a format discriminator
//!
//! # Security Guarantees
//! - Key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed with `AuthenticationFailed`

pub mod aead;
pub mod envelope;
pub mod file;
pub mod kdf;
pub mod keys;
pub mod text;

pub use aead::{open, seal, Nonce, Sealed, NONCE_SIZE, TAG_SIZE};
pub use envelope::{Envelope, EnvelopeFormat, EnvelopeRecord};
pub use file::{decode_file, encode_file, EncryptedFile, FileBlob, DEFAULT_MIME_TYPE};
pub use kdf::{derive, derive_key, KdfParams, MIN_ITERATIONS};
pub use keys::{VaultKey, KEY_LENGTH};
pub use text::{decode_text, encode_text, TextPayload};
