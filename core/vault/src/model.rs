//! Notes, their attachments and the invariants tying them to a storage domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use notevault_common::{Error, ItemId, Result, ScopeId};
use notevault_crypto::{Envelope, EnvelopeRecord, Nonce, TextPayload};
use notevault_storage::{Domain, ObjectPath};

/// Pointer from an item to one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Display name as uploaded.
    pub name: String,
    /// True content type of the plaintext.
    pub mime_type: String,
    /// Object key.
    pub storage_path: ObjectPath,
    /// Bucket holding the object.
    pub domain: Domain,
    /// Present iff the object is ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Nonce>,
    /// Plaintext size in bytes.
    pub size: u64,
}

impl FileRef {
    /// Whether the referenced object holds ciphertext.
    pub fn is_ciphertext(&self) -> bool {
        self.nonce.is_some()
    }

    /// A vaulted object always carries a nonce and a public one never does.
    pub fn validate(&self) -> Result<()> {
        match (self.domain, &self.nonce) {
            (Domain::Vaulted, None) => Err(Error::InvalidInput(format!(
                "Vaulted file '{}' has no nonce",
                self.name
            ))),
            (Domain::Public, Some(_)) => Err(Error::InvalidInput(format!(
                "Public file '{}' carries a nonce",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// A note or document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultedItem {
    pub id: ItemId,
    pub scope_id: ScopeId,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub is_vaulted: bool,
    /// Plaintext body of a public note.
    #[serde(default)]
    pub public_body: Option<TextPayload>,
    /// Encrypted body of a vaulted note.
    #[serde(default)]
    pub private_envelope: Option<EnvelopeRecord>,
    #[serde(default)]
    pub file_refs: Vec<FileRef>,
    /// Incremented by every commit.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultedItem {
    /// Create a public item at revision 0.
    pub fn new_public(
        scope_id: ScopeId,
        title: impl Into<String>,
        tags: BTreeSet<String>,
        body: Option<TextPayload>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            scope_id,
            title: title.into(),
            tags,
            is_vaulted: false,
            public_body: body,
            private_envelope: None,
            file_refs: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a vaulted item at revision 0 from an already sealed body.
    pub fn new_vaulted(
        scope_id: ScopeId,
        title: impl Into<String>,
        tags: BTreeSet<String>,
        envelope: &Envelope,
    ) -> Self {
        let mut item = Self::new_public(scope_id, title, tags, None);
        item.is_vaulted = true;
        item.private_envelope = Some(envelope.to_record());
        item
    }

    /// Domain every attachment of this item must live in.
    pub fn domain(&self) -> Domain {
        if self.is_vaulted {
            Domain::Vaulted
        } else {
            Domain::Public
        }
    }

    /// Parse the stored private envelope, if any.
    pub fn private_envelope(&self) -> Result<Option<Envelope>> {
        self.private_envelope
            .as_ref()
            .map(Envelope::from_record)
            .transpose()
    }

    /// First attachment with the given display name.
    pub fn file_named(&self, name: &str) -> Option<&FileRef> {
        self.file_refs.iter().find(|f| f.name == name)
    }

    /// Attachment stored at the given key.
    pub fn file_at(&self, path: &ObjectPath) -> Option<&FileRef> {
        self.file_refs.iter().find(|f| &f.storage_path == path)
    }

    /// Check that the flag, body and attachments agree on one domain.
    ///
    /// # Errors
    /// - `InvalidInput` describing the first violated rule
    pub fn check_invariants(&self) -> Result<()> {
        for file in &self.file_refs {
            file.validate()?;
            if file.domain != self.domain() {
                return Err(Error::InvalidInput(format!(
                    "File '{}' is in the {} domain but the item is {}",
                    file.name,
                    file.domain,
                    if self.is_vaulted { "vaulted" } else { "public" }
                )));
            }
            if file.storage_path.scope() != &self.scope_id {
                return Err(Error::InvalidInput(format!(
                    "File '{}' belongs to another scope",
                    file.name
                )));
            }
        }

        if self.is_vaulted {
            if self.public_body.is_some() {
                return Err(Error::InvalidInput(
                    "Vaulted item cannot carry a plaintext body".to_string(),
                ));
            }
            if self.private_envelope.is_none() && self.file_refs.is_empty() {
                return Err(Error::InvalidInput(
                    "Vaulted item has neither an envelope nor ciphertext files".to_string(),
                ));
            }
        } else if self.private_envelope.is_some() {
            return Err(Error::InvalidInput(
                "Public item cannot carry an envelope".to_string(),
            ));
        }

        Ok(())
    }
}
