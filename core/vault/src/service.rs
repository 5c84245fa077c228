//! Entry point for every operation on notes and attachments.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CodeCache};
use crate::gate::{UnlockedKey, VaultCodeGate};
use crate::items::ItemStore;
use crate::migration::{MigrationCoordinator, MigrationDirection, MigrationReport};
use crate::model::{FileRef, VaultedItem};
use notevault_common::{Error, ItemId, Result, ScopeId, VaultCode};
use notevault_crypto::{EncryptedFile, Envelope, EnvelopeFormat, FileBlob, TextPayload};
use notevault_storage::{Domain, ObjectPath, ObjectStore};

/// A note to be created.
#[derive(Debug, Clone)]
pub struct NoteDraft {
    pub scope_id: ScopeId,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub body: TextPayload,
    pub vaulted: bool,
}

impl NoteDraft {
    /// A public draft with no tags.
    pub fn new(scope_id: ScopeId, title: impl Into<String>, body: TextPayload) -> Self {
        Self {
            scope_id,
            title: title.into(),
            tags: BTreeSet::new(),
            body,
            vaulted: false,
        }
    }

    pub fn vaulted(mut self) -> Self {
        self.vaulted = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Notes and attachments behind the vault code gate.
pub struct VaultService {
    gate: Arc<VaultCodeGate>,
    store: Arc<dyn ObjectStore>,
    items: Arc<dyn ItemStore>,
    migrations: MigrationCoordinator,
}

impl VaultService {
    pub fn new(
        gate: Arc<VaultCodeGate>,
        store: Arc<dyn ObjectStore>,
        items: Arc<dyn ItemStore>,
    ) -> Self {
        let migrations = MigrationCoordinator::new(gate.clone(), store.clone(), items.clone());
        Self {
            gate,
            store,
            items,
            migrations,
        }
    }

    /// Check a code without deriving a key.
    pub async fn check_code(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool> {
        self.gate.verify(scope, code).await
    }

    /// Load an item record. Titles, tags and references only, no plaintext.
    pub async fn item(&self, id: &ItemId) -> Result<VaultedItem> {
        self.items.load(id).await
    }

    /// Every item in a scope, oldest first.
    pub async fn list(&self, scope: &ScopeId) -> Result<Vec<VaultedItem>> {
        self.items.list(scope).await
    }

    async fn unlock_for(
        &self,
        item: &VaultedItem,
        code: Option<&VaultCode>,
    ) -> Result<UnlockedKey> {
        let code = code.ok_or_else(|| {
            Error::InvalidPassphrase(format!("Item {} is vaulted and needs a code", item.id))
        })?;
        self.gate.unlock(&item.scope_id, code).await
    }

    /// Create a note. A vaulted draft is sealed before anything is stored.
    pub async fn create_note(
        &self,
        draft: NoteDraft,
        code: Option<&VaultCode>,
    ) -> Result<VaultedItem> {
        let item = if draft.vaulted {
            let code = code.ok_or_else(|| {
                Error::InvalidPassphrase("A vaulted note needs a code".to_string())
            })?;
            let key = self.gate.unlock(&draft.scope_id, code).await?;
            let envelope = key.encode_text(&draft.body)?;
            VaultedItem::new_vaulted(draft.scope_id, draft.title, draft.tags, &envelope)
        } else {
            VaultedItem::new_public(draft.scope_id, draft.title, draft.tags, Some(draft.body))
        };

        self.items.insert(&item).await?;
        info!(item = %item.id, vaulted = item.is_vaulted, "Note created");
        Ok(item)
    }

    /// Read a note body.
    ///
    /// Returns `None` for a public note without a body.
    ///
    /// # Errors
    /// - `InvalidPassphrase` if the note is vaulted and no code was given
    /// - `IncorrectCode` or `Verification` from the gate
    /// - `AuthenticationFailed` if the envelope does not open
    pub async fn read_note(
        &self,
        id: &ItemId,
        code: Option<&VaultCode>,
    ) -> Result<Option<TextPayload>> {
        let item = self.items.load(id).await?;
        if !item.is_vaulted {
            return Ok(item.public_body);
        }
        self.open_body(&item, code).await
    }

    async fn open_body(
        &self,
        item: &VaultedItem,
        code: Option<&VaultCode>,
    ) -> Result<Option<TextPayload>> {
        let key = self.unlock_for(item, code).await?;
        item.private_envelope()?
            .map(|envelope| key.decode_text(&envelope))
            .transpose()
    }

    /// Read a note, remembering the code for `user` once the gate accepts it.
    ///
    /// A supplied code takes precedence over a cached one. A cached code
    /// the gate no longer accepts is evicted. Public notes never touch the
    /// cache.
    pub async fn read_note_cached(
        &self,
        user: &str,
        id: &ItemId,
        code: Option<VaultCode>,
        cache: &dyn CodeCache,
        ttl: Duration,
    ) -> Result<Option<TextPayload>> {
        let item = self.items.load(id).await?;
        if !item.is_vaulted {
            return Ok(item.public_body);
        }

        let key = CacheKey::new(user, *id);
        let from_cache = code.is_none();
        let code = code.or_else(|| cache.get(&key));

        match self.open_body(&item, code.as_ref()).await {
            Ok(body) => {
                if let Some(code) = code {
                    cache.set(key, code, ttl);
                }
                Ok(body)
            }
            Err(e) => {
                if from_cache && matches!(e, Error::IncorrectCode | Error::AuthenticationFailed) {
                    debug!(item = %id, "Evicting rejected cached code");
                    cache.invalidate(&key);
                }
                Err(e)
            }
        }
    }

    /// Replace a note body, sealing it again under a fresh nonce if vaulted.
    pub async fn update_note(
        &self,
        id: &ItemId,
        body: TextPayload,
        code: Option<&VaultCode>,
    ) -> Result<VaultedItem> {
        let item = self.items.load(id).await?;
        let mut next = item.clone();

        if item.is_vaulted {
            let key = self.unlock_for(&item, code).await?;
            next.private_envelope = Some(key.encode_text(&body)?.to_record());
        } else {
            next.public_body = Some(body);
        }

        let committed = self.items.commit(&next, item.revision).await?;
        info!(item = %id, revision = committed.revision, "Note updated");
        Ok(committed)
    }

    /// Store an attachment in the item's domain and reference it.
    ///
    /// The object is uploaded and confirmed before the reference is
    /// committed. If the commit fails the upload is removed.
    pub async fn attach_file(
        &self,
        id: &ItemId,
        name: &str,
        blob: FileBlob,
        code: Option<&VaultCode>,
    ) -> Result<FileRef> {
        let item = self.items.load(id).await?;
        let path = ObjectPath::for_upload(item.scope_id, name);
        let domain = item.domain();
        let size = blob.data.len() as u64;

        let (data, nonce) = if item.is_vaulted {
            let key = self.unlock_for(&item, code).await?;
            let encrypted = key.encode_file(&blob)?;
            (encrypted.envelope.ciphertext, Some(encrypted.envelope.nonce))
        } else {
            (blob.data, None)
        };

        let expected = data.len() as u64;
        self.store.put(domain, &path, data, &blob.mime_type).await?;
        let confirmed = self.store.head(domain, &path).await?;
        if confirmed.size != expected {
            return Err(Error::Storage(format!(
                "Size mismatch for {}: wrote {} bytes, store reports {}",
                path, expected, confirmed.size
            )));
        }

        let file = FileRef {
            name: name.to_string(),
            mime_type: blob.mime_type,
            storage_path: path,
            domain,
            nonce,
            size,
        };

        let mut next = item.clone();
        next.file_refs.push(file.clone());
        if let Err(e) = self.items.commit(&next, item.revision).await {
            if let Err(cleanup) = self.store.delete(domain, &file.storage_path).await {
                warn!(
                    path = %file.storage_path,
                    error = %cleanup,
                    "Failed to remove unreferenced upload"
                );
            }
            return Err(e);
        }

        info!(item = %id, path = %file.storage_path, domain = %domain, size, "File attached");
        Ok(file)
    }

    /// Download an attachment, decrypting it if the item is vaulted.
    ///
    /// For a vaulted item nothing is downloaded until the gate accepts the code.
    pub async fn read_file(
        &self,
        id: &ItemId,
        path: &ObjectPath,
        code: Option<&VaultCode>,
    ) -> Result<FileBlob> {
        let item = self.items.load(id).await?;
        let file = item
            .file_at(path)
            .ok_or_else(|| Error::NotFound(format!("Item {} has no file {}", id, path)))?
            .clone();
        file.validate()?;

        match (file.domain, file.nonce) {
            (Domain::Vaulted, Some(nonce)) => {
                let key = self.unlock_for(&item, code).await?;
                let object = self.store.get(Domain::Vaulted, &file.storage_path).await?;
                key.decode_file(&EncryptedFile {
                    envelope: Envelope {
                        ciphertext: object.data,
                        nonce,
                        format: EnvelopeFormat::Binary,
                    },
                    mime_type: file.mime_type,
                })
            }
            _ => {
                let object = self.store.get(file.domain, &file.storage_path).await?;
                Ok(FileBlob::new(object.data, file.mime_type))
            }
        }
    }

    /// Decrypt a vaulted item and everything it references into the public domain.
    pub async fn make_public(&self, id: &ItemId, code: &VaultCode) -> Result<MigrationReport> {
        self.migrations
            .migrate(id, MigrationDirection::ToPublic, code)
            .await
    }

    /// Encrypt a public item and everything it references into the vaulted domain.
    pub async fn make_vaulted(&self, id: &ItemId, code: &VaultCode) -> Result<MigrationReport> {
        self.migrations
            .migrate(id, MigrationDirection::ToVaulted, code)
            .await
    }
}
