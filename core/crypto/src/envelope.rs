//! The unit of ciphertext at rest and its wire record.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::aead::{self, Nonce, TAG_SIZE};
use crate::keys::VaultKey;
use notevault_common::{Error, Result};

/// Declares how the plaintext inside an envelope should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeFormat {
    /// Opaque UTF-8 text. Also the meaning of an absent discriminator.
    #[serde(rename = "text")]
    Text,
    /// Serialized structured-document JSON.
    #[serde(rename = "tiptap_json")]
    StructuredJson,
    /// Legacy HTML body.
    #[serde(rename = "html")]
    Html,
    /// Raw bytes of a file.
    #[serde(rename = "binary")]
    Binary,
}

impl EnvelopeFormat {
    /// Wire name of the discriminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeFormat::Text => "text",
            EnvelopeFormat::StructuredJson => "tiptap_json",
            EnvelopeFormat::Html => "html",
            EnvelopeFormat::Binary => "binary",
        }
    }
}

/// Ciphertext, nonce and format discriminator for one encrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub nonce: Nonce,
    pub format: EnvelopeFormat,
}

impl Envelope {
    /// Seal plaintext into a new envelope under a fresh nonce.
    pub fn seal(key: &VaultKey, plaintext: &[u8], format: EnvelopeFormat) -> Result<Self> {
        let sealed = aead::seal(key, plaintext)?;
        Ok(Self {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            format,
        })
    }

    /// Authenticate and decrypt the envelope's payload.
    pub fn open(&self, key: &VaultKey) -> Result<Vec<u8>> {
        aead::open(key, &self.ciphertext, self.nonce.as_bytes())
    }

    /// Length of the plaintext this envelope decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Convert to the base64 record stored in structured documents.
    pub fn to_record(&self) -> EnvelopeRecord {
        EnvelopeRecord {
            ciphertext: STANDARD.encode(&self.ciphertext),
            nonce: self.nonce.to_base64(),
            content_format: Some(self.format),
        }
    }

    /// Parse a stored record.
    ///
    /// A record without a discriminator predates format tagging and is
    /// treated as plain text.
    pub fn from_record(record: &EnvelopeRecord) -> Result<Self> {
        let ciphertext = STANDARD
            .decode(&record.ciphertext)
            .map_err(|e| Error::Serialization(format!("Invalid ciphertext encoding: {}", e)))?;
        let nonce = Nonce::from_base64(&record.nonce)?;

        Ok(Self {
            ciphertext,
            nonce,
            format: record.content_format.unwrap_or(EnvelopeFormat::Text),
        })
    }
}

/// Wire form of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    /// Standard base64 of ciphertext with the tag appended.
    pub ciphertext: String,
    /// Standard base64 of the 12-byte nonce.
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_format: Option<EnvelopeFormat>,
}

impl EnvelopeRecord {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    #[test]
    fn test_record_roundtrip_preserves_envelope() {
        let key = VaultKey::from_bytes([3u8; KEY_LENGTH]);
        let envelope = Envelope::seal(&key, b"note body", EnvelopeFormat::Html).unwrap();

        let json = envelope.to_record().to_json().unwrap();
        let restored = Envelope::from_record(&EnvelopeRecord::from_json(&json).unwrap()).unwrap();

        assert_eq!(restored, envelope);
        assert_eq!(restored.open(&key).unwrap(), b"note body");
    }

    #[test]
    fn test_wire_field_names() {
        let record = Envelope {
            ciphertext: vec![0u8; TAG_SIZE],
            nonce: Nonce::from_bytes([0u8; 12]),
            format: EnvelopeFormat::StructuredJson,
        }
        .to_record();

        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["content_format"], "tiptap_json");
        assert_eq!(value["nonce"], "AAAAAAAAAAAAAAAA");
    }

    #[test]
    fn test_absent_format_is_legacy_text() {
        let record = EnvelopeRecord::from_json(
            r#"{"ciphertext":"AAAAAAAAAAAAAAAAAAAAAA==","nonce":"AAAAAAAAAAAAAAAA"}"#,
        )
        .unwrap();
        assert_eq!(record.content_format, None);

        let envelope = Envelope::from_record(&record).unwrap();
        assert_eq!(envelope.format, EnvelopeFormat::Text);
    }

    #[test]
    fn test_short_nonce_rejected() {
        let record = EnvelopeRecord {
            ciphertext: STANDARD.encode([0u8; 20]),
            nonce: STANDARD.encode([0u8; 8]),
            content_format: None,
        };
        assert!(matches!(
            Envelope::from_record(&record),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_plaintext_len() {
        let key = VaultKey::from_bytes([3u8; KEY_LENGTH]);
        let envelope = Envelope::seal(&key, b"12345", EnvelopeFormat::Text).unwrap();
        assert_eq!(envelope.plaintext_len(), 5);
    }
}
