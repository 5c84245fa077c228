//! Text envelopes for note bodies.
//!
//! The stored format discriminator decides how decrypted bytes are parsed.
//! A body tagged as structured JSON that fails to parse is returned as raw
//! text instead of an error, since older clients wrote mislabelled bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, EnvelopeFormat};
use crate::keys::VaultKey;
use notevault_common::{Error, Result};

/// A decoded note body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content")]
pub enum TextPayload {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "tiptap_json")]
    Structured(Value),
    #[serde(rename = "html")]
    Html(String),
}

impl TextPayload {
    /// Discriminator written next to the ciphertext.
    pub fn format(&self) -> EnvelopeFormat {
        match self {
            TextPayload::Text(_) => EnvelopeFormat::Text,
            TextPayload::Structured(_) => EnvelopeFormat::StructuredJson,
            TextPayload::Html(_) => EnvelopeFormat::Html,
        }
    }

    /// Serialized bytes as they are encrypted.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            TextPayload::Text(text) | TextPayload::Html(text) => Ok(text.as_bytes().to_vec()),
            TextPayload::Structured(doc) => {
                serde_json::to_vec(doc).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Best-effort plain rendering for previews and search.
    pub fn plain_text(&self) -> String {
        match self {
            TextPayload::Text(text) => text.clone(),
            TextPayload::Html(html) => strip_tags(html),
            TextPayload::Structured(doc) => {
                let mut out = String::new();
                collect_text(doc, &mut out);
                out.trim_end().to_string()
            }
        }
    }
}

/// Encrypt a note body.
pub fn encode_text(payload: &TextPayload, key: &VaultKey) -> Result<Envelope> {
    let bytes = payload.to_bytes()?;
    Envelope::seal(key, &bytes, payload.format())
}

/// Decrypt a note body, branching on the stored discriminator.
///
/// # Errors
/// - `AuthenticationFailed` if the key is wrong or the envelope was modified
/// - `InvalidInput` if the envelope holds a binary payload
/// - `Serialization` if the plaintext is not UTF-8
pub fn decode_text(envelope: &Envelope, key: &VaultKey) -> Result<TextPayload> {
    if envelope.format == EnvelopeFormat::Binary {
        return Err(Error::InvalidInput(
            "Binary envelope cannot be decoded as text".to_string(),
        ));
    }

    let bytes = envelope.open(key)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::Serialization("Decrypted text is not valid UTF-8".to_string()))?;

    Ok(match envelope.format {
        EnvelopeFormat::StructuredJson => match serde_json::from_str::<Value>(&text) {
            Ok(doc) => TextPayload::Structured(doc),
            Err(_) => TextPayload::Text(text),
        },
        EnvelopeFormat::Html => TextPayload::Html(text),
        EnvelopeFormat::Text | EnvelopeFormat::Binary => TextPayload::Text(text),
    })
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(Value::Array(children)) = map.get("content") {
                for child in children {
                    collect_text(child, out);
                }
            }
            let is_block = map
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t != "text" && t != "doc" && t != "hardBreak")
                .unwrap_or(false);
            if is_block && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
