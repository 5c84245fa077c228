//! Persistence for item records with compare-and-swap commits.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::model::VaultedItem;
use notevault_common::{Error, ItemId, Result, ScopeId};

/// Canonical store of item records.
///
/// `commit` is the only way an existing record changes, and it succeeds only
/// when the stored revision still equals `expected_revision`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Load one item.
    ///
    /// # Errors
    /// - `NotFound` if no record exists
    async fn load(&self, id: &ItemId) -> Result<VaultedItem>;

    /// Store a new item.
    ///
    /// # Errors
    /// - `Conflict` if the id is taken
    /// - `InvalidInput` if the item violates its invariants
    async fn insert(&self, item: &VaultedItem) -> Result<()>;

    /// Replace an item's record in one step.
    ///
    /// Returns the stored record with its revision advanced by one.
    ///
    /// # Errors
    /// - `NotFound` if no record exists
    /// - `Conflict` if the stored revision differs from `expected_revision`
    /// - `InvalidInput` if the new record violates its invariants
    async fn commit(&self, item: &VaultedItem, expected_revision: u64) -> Result<VaultedItem>;

    /// All items of a scope, ordered by creation time.
    async fn list(&self, scope: &ScopeId) -> Result<Vec<VaultedItem>>;
}

fn next_revision(item: &VaultedItem, expected_revision: u64) -> VaultedItem {
    let mut next = item.clone();
    next.revision = expected_revision + 1;
    next.updated_at = Utc::now();
    next
}

fn revision_conflict(id: &ItemId, expected: u64, found: u64) -> Error {
    Error::Conflict(format!(
        "Item {} is at revision {}, expected {}",
        id, found, expected
    ))
}

/// In-memory item store.
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<HashMap<ItemId, VaultedItem>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Storage("Item store lock poisoned".to_string())
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn load(&self, id: &ItemId) -> Result<VaultedItem> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        items
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
    }

    async fn insert(&self, item: &VaultedItem) -> Result<()> {
        item.check_invariants()?;
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        if items.contains_key(&item.id) {
            return Err(Error::Conflict(format!("Item {} already exists", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn commit(&self, item: &VaultedItem, expected_revision: u64) -> Result<VaultedItem> {
        item.check_invariants()?;
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let current = items
            .get(&item.id)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", item.id)))?;
        if current.revision != expected_revision {
            return Err(revision_conflict(&item.id, expected_revision, current.revision));
        }

        let next = next_revision(item, expected_revision);
        items.insert(item.id, next.clone());
        Ok(next)
    }

    async fn list(&self, scope: &ScopeId) -> Result<Vec<VaultedItem>> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<VaultedItem> = items
            .values()
            .filter(|item| &item.scope_id == scope)
            .cloned()
            .collect();
        found.sort_by_key(|item| item.created_at);
        Ok(found)
    }
}

/// One JSON file per item under a root directory.
///
/// Records are written to a temp file and renamed into place, so a reader
/// sees either the old or the new record. Commits are serialized within the
/// process.
pub struct JsonItemStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonItemStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &ItemId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    async fn read_record(&self, id: &ItemId) -> Result<VaultedItem> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Item not found: {}", id)))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_record(&self, item: &VaultedItem) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(item)?;
        let target = self.record_path(&item.id);
        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(item = %item.id, revision = item.revision, "Item record written");
        Ok(())
    }
}

#[async_trait]
impl ItemStore for JsonItemStore {
    async fn load(&self, id: &ItemId) -> Result<VaultedItem> {
        self.read_record(id).await
    }

    async fn insert(&self, item: &VaultedItem) -> Result<()> {
        item.check_invariants()?;
        let _guard = self.write_lock.lock().await;
        if fs::metadata(self.record_path(&item.id)).await.is_ok() {
            return Err(Error::Conflict(format!("Item {} already exists", item.id)));
        }
        self.write_record(item).await
    }

    async fn commit(&self, item: &VaultedItem, expected_revision: u64) -> Result<VaultedItem> {
        item.check_invariants()?;
        let _guard = self.write_lock.lock().await;
        let current = self.read_record(&item.id).await?;
        if current.revision != expected_revision {
            return Err(revision_conflict(&item.id, expected_revision, current.revision));
        }

        let next = next_revision(item, expected_revision);
        self.write_record(&next).await?;
        Ok(next)
    }

    async fn list(&self, scope: &ScopeId) -> Result<Vec<VaultedItem>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            let item: VaultedItem = serde_json::from_slice(&bytes)?;
            if &item.scope_id == scope {
                found.push(item);
            }
        }

        found.sort_by_key(|item| item.created_at);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_crypto::TextPayload;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn item() -> VaultedItem {
        VaultedItem::new_public(
            ScopeId::new(),
            "Groceries",
            BTreeSet::new(),
            Some(TextPayload::Text("milk".to_string())),
        )
    }

    async fn exercise_cas(store: &dyn ItemStore) {
        let original = item();
        store.insert(&original).await.unwrap();
        assert!(matches!(
            store.insert(&original).await,
            Err(Error::Conflict(_))
        ));

        let mut edited = store.load(&original.id).await.unwrap();
        edited.title = "Shopping".to_string();
        let committed = store.commit(&edited, 0).await.unwrap();
        assert_eq!(committed.revision, 1);

        // A writer still holding revision 0 loses.
        let mut stale = original.clone();
        stale.title = "Stale".to_string();
        assert!(matches!(
            store.commit(&stale, 0).await,
            Err(Error::Conflict(_))
        ));

        let loaded = store.load(&original.id).await.unwrap();
        assert_eq!(loaded.title, "Shopping");
        assert_eq!(loaded.revision, 1);

        assert_eq!(store.list(&original.scope_id).await.unwrap().len(), 1);
        assert!(store.list(&ScopeId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_cas() {
        exercise_cas(&MemoryItemStore::new()).await;
    }

    #[tokio::test]
    async fn test_json_store_cas() {
        let temp = TempDir::new().unwrap();
        exercise_cas(&JsonItemStore::new(temp.path()).unwrap()).await;
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let original = item();
        JsonItemStore::new(temp.path())
            .unwrap()
            .insert(&original)
            .await
            .unwrap();

        let reopened = JsonItemStore::new(temp.path()).unwrap();
        assert_eq!(reopened.load(&original.id).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_commit_rejects_invalid_item() {
        let store = MemoryItemStore::new();
        let original = item();
        store.insert(&original).await.unwrap();

        let mut broken = original.clone();
        broken.is_vaulted = true;
        assert!(matches!(
            store.commit(&broken, 0).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(store.load(&original.id).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let temp = TempDir::new().unwrap();
        let store = JsonItemStore::new(temp.path()).unwrap();
        assert!(matches!(
            store.load(&ItemId::new()).await,
            Err(Error::NotFound(_))
        ));
    }
}
