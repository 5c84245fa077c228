//! Moving an item between the vaulted and public domains.
//!
//! A migration runs as one unit:
//!
//! 1. The code is verified before anything is read.
//! 2. Every attachment is downloaded, transformed and written to the target
//!    domain under a fresh object path, then confirmed with a `head`.
//! 3. The item record switches flag, body and attachments in a single
//!    compare-and-swap commit.
//! 4. Superseded objects are deleted. Failures here are reported, not fatal.
//!
//! Any failure before step 3 leaves the record untouched. Objects already
//! written to the target domain stay behind as orphans that no record
//! references.
//!
//! A fresh path is always later than the path it replaces and unused in the
//! target domain. Keys are never reused, so the cleanup of one migration
//! cannot delete an object written by a later one.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gate::{UnlockedKey, VaultCodeGate};
use crate::items::ItemStore;
use crate::model::{FileRef, VaultedItem};
use notevault_common::{Error, ItemId, Result, VaultCode};
use notevault_crypto::{
    EncryptedFile, Envelope, EnvelopeFormat, EnvelopeRecord, FileBlob, TextPayload,
};
use notevault_storage::{Domain, ObjectPath, ObjectStore};

/// Which way an item moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    /// Decrypt and store plaintext.
    ToPublic,
    /// Encrypt and store ciphertext.
    ToVaulted,
}

impl MigrationDirection {
    /// Domain the attachments are read from.
    pub fn source(&self) -> Domain {
        self.target().opposite()
    }

    /// Domain the attachments are written to.
    pub fn target(&self) -> Domain {
        match self {
            Self::ToPublic => Domain::Public,
            Self::ToVaulted => Domain::Vaulted,
        }
    }

    fn vaulted(&self) -> bool {
        matches!(self, Self::ToVaulted)
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToPublic => write!(f, "to-public"),
            Self::ToVaulted => write!(f, "to-vaulted"),
        }
    }
}

/// Why a migration stopped before its commit landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The gate rejected the code or could not reach the verifier.
    Unverified,
    /// A body or attachment could not be transformed or stored.
    TransformFailed,
    /// The item changed underneath the migration.
    CommitFailed,
}

/// Step a migration has reached, recorded in order in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Verifying,
    /// `completed` of `total` attachments are confirmed in the target domain.
    TransformingBatch { completed: usize, total: usize },
    Committing,
    Committed,
    CleaningUp,
    Done,
    Aborted { reason: AbortReason },
}

/// Outcome of a committed (or no-op) migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub item: VaultedItem,
    pub direction: MigrationDirection,
    pub objects_migrated: usize,
    pub superseded_removed: usize,
    /// Superseded objects that could not be deleted.
    pub cleanup_failures: Vec<ObjectPath>,
    pub history: Vec<MigrationState>,
}

impl MigrationReport {
    /// Whether every superseded object was removed.
    pub fn is_clean(&self) -> bool {
        self.cleanup_failures.is_empty()
    }
}

struct Transitions {
    item: ItemId,
    history: Vec<MigrationState>,
}

impl Transitions {
    fn new(item: ItemId) -> Self {
        let mut transitions = Self {
            item,
            history: Vec::new(),
        };
        transitions.enter(MigrationState::Idle);
        transitions
    }

    fn enter(&mut self, state: MigrationState) {
        debug!(item = %self.item, state = ?state, "Migration state");
        self.history.push(state);
    }

    fn abort(&mut self, reason: AbortReason) {
        self.enter(MigrationState::Aborted { reason });
    }
}

/// Runs migrations against one object store and item store.
pub struct MigrationCoordinator {
    gate: Arc<VaultCodeGate>,
    store: Arc<dyn ObjectStore>,
    items: Arc<dyn ItemStore>,
}

impl MigrationCoordinator {
    pub fn new(
        gate: Arc<VaultCodeGate>,
        store: Arc<dyn ObjectStore>,
        items: Arc<dyn ItemStore>,
    ) -> Self {
        Self { gate, store, items }
    }

    /// Migrate an item and every attachment it references.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `IncorrectCode`, `InvalidPassphrase` or `Verification` from the
    ///   gate, with nothing read or written
    /// - `MigrationAborted` if a transform, upload or the final commit
    ///   failed, with the item record unchanged
    pub async fn migrate(
        &self,
        item_id: &ItemId,
        direction: MigrationDirection,
        code: &VaultCode,
    ) -> Result<MigrationReport> {
        let mut transitions = Transitions::new(*item_id);
        let item = self.items.load(item_id).await?;

        transitions.enter(MigrationState::Verifying);
        let key = match self.gate.unlock(&item.scope_id, code).await {
            Ok(key) => key,
            Err(e) => {
                transitions.abort(AbortReason::Unverified);
                return Err(e);
            }
        };

        if item.is_vaulted == direction.vaulted() {
            info!(item = %item.id, direction = %direction, "Item already in target state");
            transitions.enter(MigrationState::Done);
            return Ok(MigrationReport {
                item,
                direction,
                objects_migrated: 0,
                superseded_removed: 0,
                cleanup_failures: Vec::new(),
                history: transitions.history,
            });
        }

        let total = item.file_refs.len();
        transitions.enter(MigrationState::TransformingBatch {
            completed: 0,
            total,
        });

        let (public_body, private_envelope) = match transform_body(&item, direction, &key) {
            Ok(body) => body,
            Err(e) => {
                transitions.abort(AbortReason::TransformFailed);
                return Err(Error::MigrationAborted {
                    reason: format!("note body: {}", e),
                    objects_completed: 0,
                    objects_remaining: total,
                });
            }
        };

        let mut migrated = Vec::with_capacity(total);
        let mut last_stamp = i64::MIN;
        for (index, file) in item.file_refs.iter().enumerate() {
            match self.migrate_object(file, direction, &key, &mut last_stamp).await {
                Ok(next) => {
                    migrated.push(next);
                    transitions.enter(MigrationState::TransformingBatch {
                        completed: index + 1,
                        total,
                    });
                }
                Err(e) => {
                    transitions.abort(AbortReason::TransformFailed);
                    if !migrated.is_empty() {
                        warn!(
                            item = %item.id,
                            orphans = migrated.len(),
                            domain = %direction.target(),
                            "Migration aborted, written objects left unreferenced"
                        );
                    }
                    return Err(Error::MigrationAborted {
                        reason: format!("{}: {}", file.name, e),
                        objects_completed: index,
                        objects_remaining: total - index,
                    });
                }
            }
        }

        transitions.enter(MigrationState::Committing);
        let mut next = item.clone();
        next.is_vaulted = direction.vaulted();
        next.public_body = public_body;
        next.private_envelope = private_envelope;
        next.file_refs = migrated;

        let committed = match self.items.commit(&next, item.revision).await {
            Ok(committed) => committed,
            Err(e) => {
                transitions.abort(AbortReason::CommitFailed);
                if total > 0 {
                    warn!(
                        item = %item.id,
                        orphans = total,
                        domain = %direction.target(),
                        "Commit failed, written objects left unreferenced"
                    );
                }
                return Err(Error::MigrationAborted {
                    reason: format!("commit: {}", e),
                    objects_completed: total,
                    objects_remaining: 0,
                });
            }
        };
        transitions.enter(MigrationState::Committed);

        transitions.enter(MigrationState::CleaningUp);
        let mut removed = 0;
        let mut cleanup_failures = Vec::new();
        for old in &item.file_refs {
            match self.store.delete(old.domain, &old.storage_path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(
                        path = %old.storage_path,
                        domain = %old.domain,
                        error = %e,
                        "Failed to remove superseded object"
                    );
                    cleanup_failures.push(old.storage_path.clone());
                }
            }
        }

        transitions.enter(MigrationState::Done);
        info!(
            item = %committed.id,
            direction = %direction,
            objects = total,
            removed,
            "Migration committed"
        );

        Ok(MigrationReport {
            item: committed,
            direction,
            objects_migrated: total,
            superseded_removed: removed,
            cleanup_failures,
            history: transitions.history,
        })
    }

    /// Copy one attachment into the target domain under a fresh path.
    ///
    /// `last_stamp` is the newest timestamp issued so far in this batch.
    async fn migrate_object(
        &self,
        file: &FileRef,
        direction: MigrationDirection,
        key: &UnlockedKey,
        last_stamp: &mut i64,
    ) -> Result<FileRef> {
        file.validate()?;
        if file.domain != direction.source() {
            return Err(Error::InvalidInput(format!(
                "'{}' is already in the {} domain",
                file.name, file.domain
            )));
        }

        let object = self.store.get(file.domain, &file.storage_path).await?;
        debug!(path = %file.storage_path, size = object.data.len(), "Downloaded object");

        let (data, nonce) = match direction {
            MigrationDirection::ToPublic => {
                let nonce = file.nonce.ok_or_else(|| {
                    Error::InvalidInput(format!("'{}' has no nonce", file.name))
                })?;
                let encrypted = EncryptedFile {
                    envelope: Envelope {
                        ciphertext: object.data,
                        nonce,
                        format: EnvelopeFormat::Binary,
                    },
                    mime_type: file.mime_type.clone(),
                };
                (key.decode_file(&encrypted)?.data, None)
            }
            MigrationDirection::ToVaulted => {
                let blob = FileBlob::new(object.data, file.mime_type.clone());
                let encrypted = key.encode_file(&blob)?;
                (encrypted.envelope.ciphertext, Some(encrypted.envelope.nonce))
            }
        };

        let target = direction.target();
        let path = self.fresh_path(file, target, last_stamp).await?;
        let expected = data.len() as u64;
        self.store.put(target, &path, data, &file.mime_type).await?;

        let confirmed = self.store.head(target, &path).await?;
        if confirmed.size != expected {
            return Err(Error::Storage(format!(
                "Size mismatch for {}: wrote {} bytes, store reports {}",
                path, expected, confirmed.size
            )));
        }
        debug!(
            from = %file.storage_path,
            path = %path,
            domain = %target,
            size = expected,
            "Confirmed object"
        );

        Ok(FileRef {
            storage_path: path,
            domain: target,
            nonce,
            ..file.clone()
        })
    }

    /// Pick the key for the replacement of `file` in `domain`.
    ///
    /// The timestamp is later than the source key and than `last_stamp`,
    /// and the key does not exist in `domain` yet.
    async fn fresh_path(
        &self,
        file: &FileRef,
        domain: Domain,
        last_stamp: &mut i64,
    ) -> Result<ObjectPath> {
        let source = file.storage_path.timestamp_millis().unwrap_or(i64::MIN);
        let mut stamp = Utc::now()
            .timestamp_millis()
            .max(source.saturating_add(1))
            .max(last_stamp.saturating_add(1));

        loop {
            let path = ObjectPath::new(*file.storage_path.scope(), stamp, &file.name);
            if !self.store.exists(domain, &path).await? {
                *last_stamp = stamp;
                return Ok(path);
            }
            stamp = stamp.saturating_add(1);
        }
    }
}

type Body = (Option<TextPayload>, Option<EnvelopeRecord>);

fn transform_body(
    item: &VaultedItem,
    direction: MigrationDirection,
    key: &UnlockedKey,
) -> Result<Body> {
    match direction {
        MigrationDirection::ToPublic => {
            let body = item
                .private_envelope()?
                .map(|envelope| key.decode_text(&envelope))
                .transpose()?;
            Ok((body, None))
        }
        MigrationDirection::ToVaulted => {
            // A vaulted note always carries an envelope, even for an empty body.
            let body = item
                .public_body
                .clone()
                .unwrap_or_else(|| TextPayload::Text(String::new()));
            let envelope = key.encode_text(&body)?;
            Ok((None, Some(envelope.to_record())))
        }
    }
}
