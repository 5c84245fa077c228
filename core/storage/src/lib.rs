//! Object storage abstraction for NoteVault.
//!
//! Every scope owns two logical buckets: `vaulted` for AEAD ciphertext and
//! `public` for plaintext. This module provides the trait both are accessed
//! through, plus memory and local-filesystem backends and a registry for
//! resolving a backend from configuration.
//!
//! # Design Principles
//! - Store isolation: no crypto or item logic here
//! - Async operations: all I/O operations are async
//! - Unified error semantics: consistent error types across stores

pub mod local;
pub mod memory;
pub mod path;
pub mod provider;
pub mod registry;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use path::{sanitize_name, Domain, ObjectPath};
pub use provider::{ObjectMetadata, ObjectStore, StoredObject};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
