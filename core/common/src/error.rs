//! Common error types for NoteVault.

use thiserror::Error;

/// Top-level error type for NoteVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Passphrase was empty or malformed. Raised locally, no network call made.
    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(String),

    /// The remote verification call failed. Retrying may succeed.
    #[error("Verification error: {0}")]
    Verification(String),

    /// The verification service answered that the code is wrong.
    #[error("Incorrect vault code")]
    IncorrectCode,

    /// AEAD tag mismatch. Never accompanied by any plaintext.
    #[error("Authentication failed: ciphertext could not be decrypted")]
    AuthenticationFailed,

    /// A migration batch stopped before the pointer switch.
    ///
    /// `objects_completed` objects were written to the new domain and are
    /// now unreferenced. The stored item is unchanged.
    #[error(
        "Migration aborted after {objects_completed} object(s), {objects_remaining} remaining: {reason}"
    )]
    MigrationAborted {
        reason: String,
        objects_completed: usize,
        objects_remaining: usize,
    },

    /// Object storage download or upload failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent modification detected.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Whether the failure is transient and the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Verification(_) | Error::Storage(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
