//! Local filesystem object store.
//!
//! Layout: `<root>/<domain>/<scope>/<object>`, with the recorded MIME type
//! in `<root>/<domain>/<scope>/.meta/<object>.json`. Writes go to a temp
//! file that is synced and renamed into place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::path::{Domain, ObjectPath};
use crate::provider::{ObjectMetadata, ObjectStore, StoredObject};
use notevault_common::{Error, Result, ScopeId};

const META_DIRNAME: &str = ".meta";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    mime_type: String,
}

/// Local filesystem object store.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    fn scope_dir(&self, domain: Domain, scope: &ScopeId) -> PathBuf {
        self.root.join(domain.as_str()).join(scope.to_string())
    }

    fn object_file(&self, domain: Domain, path: &ObjectPath) -> PathBuf {
        self.scope_dir(domain, path.scope()).join(path.object_name())
    }

    fn sidecar_file(&self, domain: Domain, path: &ObjectPath) -> PathBuf {
        self.scope_dir(domain, path.scope())
            .join(META_DIRNAME)
            .join(format!("{}.json", path.object_name()))
    }

    async fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
        let parent = target
            .parent()
            .ok_or_else(|| Error::Storage(format!("No parent for {}", target.display())))?;
        fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_metadata(&self, domain: Domain, path: &ObjectPath) -> Result<ObjectMetadata> {
        let file = self.object_file(domain, path);
        let fs_meta = match fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                return Err(Error::NotFound(format!(
                    "Object not found: {}:{}",
                    domain, path
                )))
            }
        };

        let sidecar: Sidecar = match fs::read(self.sidecar_file(domain, path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(_) => Sidecar {
                mime_type: "application/octet-stream".to_string(),
            },
        };

        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Ok(ObjectMetadata {
            path: path.clone(),
            domain,
            size: fs_meta.len(),
            mime_type: sidecar.mime_type,
            modified,
            etag: Some(format!("{}-{}", modified.timestamp_millis(), fs_meta.len())),
        })
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(
        &self,
        domain: Domain,
        path: &ObjectPath,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<ObjectMetadata> {
        let sidecar = serde_json::to_vec(&Sidecar {
            mime_type: mime_type.to_string(),
        })?;

        Self::write_atomic(&self.sidecar_file(domain, path), &sidecar).await?;
        Self::write_atomic(&self.object_file(domain, path), &data).await?;

        debug!(domain = %domain, path = %path, size = data.len(), "Object stored");
        self.read_metadata(domain, path).await
    }

    async fn get(&self, domain: Domain, path: &ObjectPath) -> Result<StoredObject> {
        let metadata = self.read_metadata(domain, path).await?;
        let data = fs::read(self.object_file(domain, path)).await?;
        Ok(StoredObject { data, metadata })
    }

    async fn head(&self, domain: Domain, path: &ObjectPath) -> Result<ObjectMetadata> {
        self.read_metadata(domain, path).await
    }

    async fn exists(&self, domain: Domain, path: &ObjectPath) -> Result<bool> {
        Ok(fs::metadata(self.object_file(domain, path))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false))
    }

    async fn delete(&self, domain: Domain, path: &ObjectPath) -> Result<()> {
        let file = self.object_file(domain, path);
        if !self.exists(domain, path).await? {
            return Err(Error::NotFound(format!(
                "Object not found: {}:{}",
                domain, path
            )));
        }

        fs::remove_file(&file).await?;
        let _ = fs::remove_file(self.sidecar_file(domain, path)).await;
        Ok(())
    }

    async fn list(&self, domain: Domain, scope: &ScopeId) -> Result<Vec<ObjectMetadata>> {
        let dir = self.scope_dir(domain, scope);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            let path = ObjectPath::parse(&format!("{}/{}", scope, name))?;
            results.push(self.read_metadata(domain, &path).await?);
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}
