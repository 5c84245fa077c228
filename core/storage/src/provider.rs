//! Object store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::{Domain, ObjectPath};
use notevault_common::{Result, ScopeId};

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key.
    pub path: ObjectPath,
    /// Bucket holding the object.
    pub domain: Domain,
    /// Size in bytes of the stored data.
    pub size: u64,
    /// Content type recorded at upload.
    pub mime_type: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// ETag or revision ID, if the backend provides one.
    pub etag: Option<String>,
}

/// Object data together with its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: ObjectMetadata,
}

/// Blob store holding a scope's vaulted and public domains.
///
/// Implementations must handle their own authentication and rate limiting.
/// Timeouts surface as ordinary `Storage` errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Write an object, replacing any existing one at the same key.
    ///
    /// # Postconditions
    /// - Returns metadata of the stored object once it is durable
    async fn put(
        &self,
        domain: Domain,
        path: &ObjectPath,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<ObjectMetadata>;

    /// Read an object.
    ///
    /// # Errors
    /// - `NotFound` if no object exists at the key
    async fn get(&self, domain: Domain, path: &ObjectPath) -> Result<StoredObject>;

    /// Read an object's metadata without its data.
    async fn head(&self, domain: Domain, path: &ObjectPath) -> Result<ObjectMetadata>;

    /// Check if an object exists.
    async fn exists(&self, domain: Domain, path: &ObjectPath) -> Result<bool>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if no object exists at the key
    async fn delete(&self, domain: Domain, path: &ObjectPath) -> Result<()>;

    /// List a scope's objects in one domain.
    async fn list(&self, domain: Domain, scope: &ScopeId) -> Result<Vec<ObjectMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serialization() {
        let metadata = ObjectMetadata {
            path: ObjectPath::new(ScopeId::new(), 1, "test-file.txt"),
            domain: Domain::Public,
            size: 1024,
            mime_type: "text/plain".to_string(),
            modified: Utc::now(),
            etag: Some("abc123".to_string()),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: ObjectMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, metadata);
    }
}
