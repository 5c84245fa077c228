//! Common utilities and types shared across NoteVault modules.
//!
//! This module provides the error taxonomy and the identifier types used
//! by the crypto, storage and vault crates.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ItemId, ScopeId, VaultCode};
