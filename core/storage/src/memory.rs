//! In-memory object store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::path::{Domain, ObjectPath};
use crate::provider::{ObjectMetadata, ObjectStore, StoredObject};
use notevault_common::{Error, Result, ScopeId};

type Objects = HashMap<(Domain, ObjectPath), StoredObject>;

/// In-memory object store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<Objects>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently held in a domain.
    pub fn len(&self, domain: Domain) -> usize {
        self.read()
            .map(|objects| objects.keys().filter(|(d, _)| *d == domain).count())
            .unwrap_or(0)
    }

    /// Whether a domain holds no objects.
    pub fn is_empty(&self, domain: Domain) -> bool {
        self.len(domain) == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Objects>> {
        self.objects
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Objects>> {
        self.objects
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        domain: Domain,
        path: &ObjectPath,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<ObjectMetadata> {
        let metadata = ObjectMetadata {
            path: path.clone(),
            domain,
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
            modified: Utc::now(),
            etag: Some(Uuid::new_v4().to_string()),
        };

        let object = StoredObject {
            data,
            metadata: metadata.clone(),
        };
        self.write()?.insert((domain, path.clone()), object);

        Ok(metadata)
    }

    async fn get(&self, domain: Domain, path: &ObjectPath) -> Result<StoredObject> {
        self.read()?
            .get(&(domain, path.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}:{}", domain, path)))
    }

    async fn head(&self, domain: Domain, path: &ObjectPath) -> Result<ObjectMetadata> {
        self.read()?
            .get(&(domain, path.clone()))
            .map(|object| object.metadata.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}:{}", domain, path)))
    }

    async fn exists(&self, domain: Domain, path: &ObjectPath) -> Result<bool> {
        Ok(self.read()?.contains_key(&(domain, path.clone())))
    }

    async fn delete(&self, domain: Domain, path: &ObjectPath) -> Result<()> {
        self.write()?
            .remove(&(domain, path.clone()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}:{}", domain, path)))
    }

    async fn list(&self, domain: Domain, scope: &ScopeId) -> Result<Vec<ObjectMetadata>> {
        let mut results: Vec<ObjectMetadata> = self
            .read()?
            .iter()
            .filter(|((d, path), _)| *d == domain && path.scope() == scope)
            .map(|(_, object)| object.metadata.clone())
            .collect();
        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(scope: ScopeId, name: &str) -> ObjectPath {
        ObjectPath::new(scope, 1, name)
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        let path = path(ScopeId::new(), "test.txt");

        store
            .put(Domain::Public, &path, b"Hello, World!".to_vec(), "text/plain")
            .await
            .unwrap();
        let object = store.get(Domain::Public, &path).await.unwrap();

        assert_eq!(object.data, b"Hello, World!");
        assert_eq!(object.metadata.mime_type, "text/plain");
        assert_eq!(object.metadata.size, 13);
    }

    #[tokio::test]
    async fn test_domains_are_separate() {
        let store = MemoryStore::new();
        let path = path(ScopeId::new(), "a.bin");

        store
            .put(Domain::Vaulted, &path, vec![1, 2, 3], "application/octet-stream")
            .await
            .unwrap();

        assert!(store.exists(Domain::Vaulted, &path).await.unwrap());
        assert!(!store.exists(Domain::Public, &path).await.unwrap());
        assert!(matches!(
            store.get(Domain::Public, &path).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let path = path(ScopeId::new(), "test.txt");

        store.put(Domain::Public, &path, vec![1], "text/plain").await.unwrap();
        store.delete(Domain::Public, &path).await.unwrap();

        assert!(!store.exists(Domain::Public, &path).await.unwrap());
        assert!(store.delete(Domain::Public, &path).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_scope_and_domain() {
        let store = MemoryStore::new();
        let scope = ScopeId::new();
        let other = ScopeId::new();

        store.put(Domain::Public, &path(scope, "a"), vec![1], "x/y").await.unwrap();
        store.put(Domain::Public, &path(scope, "b"), vec![2], "x/y").await.unwrap();
        store.put(Domain::Vaulted, &path(scope, "c"), vec![3], "x/y").await.unwrap();
        store.put(Domain::Public, &path(other, "d"), vec![4], "x/y").await.unwrap();

        let listed = store.list(Domain::Public, &scope).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.len(Domain::Public), 3);
        assert_eq!(store.len(Domain::Vaulted), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let path = path(ScopeId::new(), "shared");

        clone.put(Domain::Public, &path, vec![9], "x/y").await.unwrap();
        assert!(store.exists(Domain::Public, &path).await.unwrap());
    }
}
