//! Spies and fault injection for the vault tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::items::{ItemStore, MemoryItemStore};
use crate::model::VaultedItem;
use crate::verifier::{CodeVerifier, StaticCodeVerifier};
use notevault_common::{Error, ItemId, Result, ScopeId, VaultCode};
use notevault_storage::{
    Domain, MemoryStore, ObjectMetadata, ObjectPath, ObjectStore, StoredObject,
};

/// Verifier that counts calls and can fail its first `n` calls.
pub struct SpyVerifier {
    inner: StaticCodeVerifier,
    calls: AtomicUsize,
    fail_first: usize,
}

impl SpyVerifier {
    pub fn accepting(scope: ScopeId, code: &str) -> Self {
        Self {
            inner: StaticCodeVerifier::new().with_code(scope, code),
            calls: AtomicUsize::new(0),
            fail_first: 0,
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeVerifier for SpyVerifier {
    async fn verify(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(Error::Verification("verifier unavailable".to_string()));
        }
        self.inner.verify(scope, code).await
    }
}

/// Pauses one delete until released.
#[derive(Default)]
pub struct DeleteHold {
    /// Notified once the held delete has started.
    pub reached: Notify,
    /// Notify to let the held delete continue.
    pub release: Notify,
}

#[derive(Default)]
struct Faults {
    /// Fail the n-th (1-based) put into this domain.
    put: Option<(Domain, usize)>,
    puts_seen: usize,
    deletes: bool,
    /// Data written by `put` into this domain is truncated by one byte.
    short_writes: Option<Domain>,
    hold_delete: Option<(Domain, Arc<DeleteHold>)>,
}

/// Memory store wrapper that counts reads and fails on demand.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    gets: AtomicUsize,
    faults: Mutex<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` upload (1-based) into `domain` from now on.
    pub fn fail_put(&self, domain: Domain, nth: usize) {
        let mut faults = self.faults.lock().unwrap();
        faults.put = Some((domain, nth));
        faults.puts_seen = 0;
    }

    pub fn heal(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    pub fn fail_deletes(&self) {
        self.faults.lock().unwrap().deletes = true;
    }

    pub fn short_writes(&self, domain: Domain) {
        self.faults.lock().unwrap().short_writes = Some(domain);
    }

    /// Pause the next delete in `domain` until the hold is released.
    pub fn hold_next_delete(&self, domain: Domain) -> Arc<DeleteHold> {
        let hold = Arc::new(DeleteHold::default());
        self.faults.lock().unwrap().hold_delete = Some((domain, hold.clone()));
        hold
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn put(
        &self,
        domain: Domain,
        path: &ObjectPath,
        mut data: Vec<u8>,
        mime_type: &str,
    ) -> Result<ObjectMetadata> {
        {
            let mut faults = self.faults.lock().unwrap();
            if let Some((fail_domain, nth)) = faults.put {
                if fail_domain == domain {
                    faults.puts_seen += 1;
                    if faults.puts_seen == nth {
                        return Err(Error::Storage("injected upload failure".to_string()));
                    }
                }
            }
            if faults.short_writes == Some(domain) {
                data.pop();
            }
        }
        self.inner.put(domain, path, data, mime_type).await
    }

    async fn get(&self, domain: Domain, path: &ObjectPath) -> Result<StoredObject> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(domain, path).await
    }

    async fn head(&self, domain: Domain, path: &ObjectPath) -> Result<ObjectMetadata> {
        self.inner.head(domain, path).await
    }

    async fn exists(&self, domain: Domain, path: &ObjectPath) -> Result<bool> {
        self.inner.exists(domain, path).await
    }

    async fn delete(&self, domain: Domain, path: &ObjectPath) -> Result<()> {
        let hold = {
            let mut faults = self.faults.lock().unwrap();
            if faults.deletes {
                return Err(Error::Storage("injected delete failure".to_string()));
            }
            match faults.hold_delete.take() {
                Some((held, hold)) if held == domain => Some(hold),
                other => {
                    faults.hold_delete = other;
                    None
                }
            }
        };
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.release.notified().await;
        }
        self.inner.delete(domain, path).await
    }

    async fn list(&self, domain: Domain, scope: &ScopeId) -> Result<Vec<ObjectMetadata>> {
        self.inner.list(domain, scope).await
    }
}

/// Item store where another writer renames the item right before the next
/// commit lands.
#[derive(Default)]
pub struct RacingItemStore {
    pub inner: MemoryItemStore,
    race_next_commit: AtomicBool,
}

impl RacingItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn race_next_commit(&self) {
        self.race_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ItemStore for RacingItemStore {
    async fn load(&self, id: &ItemId) -> Result<VaultedItem> {
        self.inner.load(id).await
    }

    async fn insert(&self, item: &VaultedItem) -> Result<()> {
        self.inner.insert(item).await
    }

    async fn commit(&self, item: &VaultedItem, expected_revision: u64) -> Result<VaultedItem> {
        if self.race_next_commit.swap(false, Ordering::SeqCst) {
            let mut other = self.inner.load(&item.id).await?;
            other.title = format!("{} (edited elsewhere)", other.title);
            let revision = other.revision;
            self.inner.commit(&other, revision).await?;
        }
        self.inner.commit(item, expected_revision).await
    }

    async fn list(&self, scope: &ScopeId) -> Result<Vec<VaultedItem>> {
        self.inner.list(scope).await
    }
}
