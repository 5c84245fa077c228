//! Vault engine for NoteVault.
//!
//! This module provides:
//! - Item records and their compare-and-swap persistence
//! - The vault code gate, the only producer of decryption keys
//! - Migration of items between the vaulted and public domains
//! - A service facade routing every note and file operation through the gate
//!
//! # Architecture
//! The vault module sits between the user interface and the object stores.
//! Plaintext of a vaulted item only exists in memory, after the remote
//! verifier has accepted the code.

pub mod cache;
pub mod config;
pub mod gate;
pub mod items;
pub mod migration;
pub mod model;
pub mod retry;
pub mod service;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use cache::{CacheKey, CodeCache, MemoryCodeCache, DEFAULT_CODE_TTL};
pub use config::{
    RetrySettings, StorageSettings, VaultSettings, VerifierSettings, SETTINGS_FILENAME,
};
pub use gate::{UnlockedKey, VaultCodeGate};
pub use items::{ItemStore, JsonItemStore, MemoryItemStore};
pub use migration::{
    AbortReason, MigrationCoordinator, MigrationDirection, MigrationReport, MigrationState,
};
pub use model::{FileRef, VaultedItem};
pub use retry::{RetryConfig, RetryExecutor};
pub use service::{NoteDraft, VaultService};
pub use verifier::{CodeVerifier, HttpCodeVerifier, StaticCodeVerifier};
