//! File envelopes for binary attachments.

use crate::envelope::{Envelope, EnvelopeFormat};
use crate::keys::VaultKey;
use notevault_common::{Error, Result};

/// MIME type assumed when none is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Plaintext file content with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl FileBlob {
    /// Create a blob, substituting the default MIME type for an empty one.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            data,
            mime_type: if mime_type.trim().is_empty() {
                DEFAULT_MIME_TYPE.to_string()
            } else {
                mime_type
            },
        }
    }
}

/// An encrypted file: envelope plus the MIME type kept as metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub envelope: Envelope,
    pub mime_type: String,
}

/// Encrypt file content.
pub fn encode_file(blob: &FileBlob, key: &VaultKey) -> Result<EncryptedFile> {
    let envelope = Envelope::seal(key, &blob.data, EnvelopeFormat::Binary)?;
    Ok(EncryptedFile {
        envelope,
        mime_type: blob.mime_type.clone(),
    })
}

/// Decrypt file content and restore its MIME type.
///
/// # Errors
/// - `AuthenticationFailed` if the key is wrong or the ciphertext was modified
/// - `InvalidInput` if the envelope is tagged as text
pub fn decode_file(file: &EncryptedFile, key: &VaultKey) -> Result<FileBlob> {
    if file.envelope.format != EnvelopeFormat::Binary {
        return Err(Error::InvalidInput(format!(
            "Expected a binary envelope, found '{}'",
            file.envelope.format.as_str()
        )));
    }

    let data = file.envelope.open(key)?;
    Ok(FileBlob::new(data, file.mime_type.clone()))
}
