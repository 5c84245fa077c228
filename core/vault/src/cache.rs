//! Short-lived cache of vault codes typed in by a user.
//!
//! The cache only spares the user from typing the code again. Every decrypt
//! still goes through the gate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use notevault_common::{ItemId, VaultCode};

/// Default lifetime of a cached code.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache entry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user: String,
    pub item: ItemId,
}

impl CacheKey {
    pub fn new(user: impl Into<String>, item: ItemId) -> Self {
        Self {
            user: user.into(),
            item,
        }
    }
}

/// Storage for recently entered codes.
pub trait CodeCache: Send + Sync {
    /// Cached code, if present and not expired.
    fn get(&self, key: &CacheKey) -> Option<VaultCode>;

    fn set(&self, key: CacheKey, code: VaultCode, ttl: Duration);

    fn invalidate(&self, key: &CacheKey);
}

struct Entry {
    code: VaultCode,
    expires_at: Instant,
}

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryCodeCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl MemoryCodeCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeCache for MemoryCodeCache {
    fn get(&self, key: &CacheKey) -> Option<VaultCode> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.code.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a code, dropping every entry that has already expired.
    fn set(&self, key: CacheKey, code: VaultCode, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
            entries.insert(
                key,
                Entry {
                    code,
                    expires_at: now + ttl,
                },
            );
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_invalidate() {
        let cache = MemoryCodeCache::new();
        let key = CacheKey::new("alice", ItemId::new());

        cache.set(key.clone(), "correct-horse".into(), DEFAULT_CODE_TTL);
        assert_eq!(cache.get(&key).unwrap().expose(), "correct-horse");

        cache.invalidate(&key);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_entries_are_per_user_and_item() {
        let cache = MemoryCodeCache::new();
        let item = ItemId::new();
        cache.set(CacheKey::new("alice", item), "a".into(), DEFAULT_CODE_TTL);

        assert!(cache.get(&CacheKey::new("bob", item)).is_none());
        assert!(cache.get(&CacheKey::new("alice", ItemId::new())).is_none());
    }

    #[test]
    fn test_expired_entry() {
        let cache = MemoryCodeCache::new();
        let key = CacheKey::new("alice", ItemId::new());
        cache.set(key.clone(), "a".into(), Duration::ZERO);

        assert!(cache.get(&key).is_none());

        cache.set(key, "a".into(), Duration::ZERO);
        cache.set(CacheKey::new("bob", ItemId::new()), "b".into(), DEFAULT_CODE_TTL);
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }
}
