//! Session key cache.
//!
//! Two tiers: an in-memory map consulted first, and a per-device durable
//! entry `key-cache:<uid>` holding the base64 raw key so a restart on the
//! same device skips the passphrase prompt.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::CryptoKey;
use crate::error::{Result, VaultError};
use crate::storage::SharedStore;

/// Durable key prefix owned by the cache.
pub const KEY_CACHE_PREFIX: &str = "key-cache:";

/// Where a `set` landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCacheWrite {
    /// Memory and durable store.
    Durable,
    /// Memory only; the durable write failed for the given reason.
    MemoryOnly(VaultError),
}

pub struct KeyCache {
    store: SharedStore,
    memory: Mutex<HashMap<String, CryptoKey>>,
}

impl KeyCache {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            memory: Mutex::new(HashMap::new()),
        }
    }

    fn lock_memory(&self) -> Result<MutexGuard<'_, HashMap<String, CryptoKey>>> {
        self.memory
            .lock()
            .map_err(|_| VaultError::Other("key cache poisoned".to_string()))
    }

    fn durable_key(user_id: &str) -> String {
        format!("{}{}", KEY_CACHE_PREFIX, user_id)
    }

    /// Cache `key` for `user_id`.
    pub async fn set(&self, user_id: &str, key: &CryptoKey) -> Result<KeyCacheWrite> {
        self.lock_memory()?.insert(user_id.to_string(), key.clone());

        let encoded = Zeroizing::new(STANDARD.encode(key.raw_bytes()));
        match self.store.set(&Self::durable_key(user_id), &encoded).await {
            Ok(()) => {
                debug!(user_id, fingerprint = %key.fingerprint(), "cached key");
                Ok(KeyCacheWrite::Durable)
            }
            Err(err) => {
                warn!(user_id, error = %err, "key cached in memory only");
                Ok(KeyCacheWrite::MemoryOnly(err))
            }
        }
    }

    /// Cached key for `user_id`, if any.
    pub async fn get(&self, user_id: &str) -> Result<Option<CryptoKey>> {
        let warm = self.lock_memory()?.get(user_id).cloned();
        if warm.is_some() {
            return Ok(warm);
        }

        let durable_key = Self::durable_key(user_id);
        let stored = match self.store.get(&durable_key).await? {
            Some(value) => Zeroizing::new(value),
            None => return Ok(None),
        };

        let key = match STANDARD
            .decode(stored.as_bytes())
            .map_err(|e| VaultError::Validation(e.to_string()))
            .map(Zeroizing::new)
            .and_then(|raw| CryptoKey::from_slice(&raw))
        {
            Ok(key) => key,
            Err(err) => {
                warn!(user_id, error = %err, "discarding malformed cached key");
                self.store.remove(&durable_key).await?;
                return Ok(None);
            }
        };

        self.lock_memory()?.insert(user_id.to_string(), key.clone());
        debug!(user_id, fingerprint = %key.fingerprint(), "restored key from device cache");
        Ok(Some(key))
    }

    /// Forget one user's key in both tiers.
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        self.lock_memory()?.remove(user_id);
        self.store.remove(&Self::durable_key(user_id)).await
    }

    /// Forget every cached key in both tiers.
    pub async fn clear_all(&self) -> Result<()> {
        self.lock_memory()?.clear();
        for key in self.store.keys().await? {
            if key.starts_with(KEY_CACHE_PREFIX) {
                self.store.remove(&key).await?;
            }
        }
        Ok(())
    }

    /// Drop in-memory keys; the device cache is kept.
    pub fn teardown(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
    }

    /// Whether `user_id` has a key in memory (no I/O).
    pub fn is_warm(&self, user_id: &str) -> bool {
        self.memory
            .lock()
            .map(|memory| memory.contains_key(user_id))
            .unwrap_or(false)
    }
}

impl Drop for KeyCache {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{DurableStore, MemoryStore};

    fn cache_with_store() -> (KeyCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (KeyCache::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_set_then_get_from_memory() {
        let (cache, _) = cache_with_store();
        let key = CryptoKey::generate().unwrap();

        assert_eq!(cache.set("alice", &key).await.unwrap(), KeyCacheWrite::Durable);
        assert_eq!(cache.get("alice").await.unwrap(), Some(key));
        assert_eq!(cache.get("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restores_from_device_after_teardown() {
        let (cache, store) = cache_with_store();
        let key = CryptoKey::generate().unwrap();
        cache.set("alice", &key).await.unwrap();
        drop(cache);

        let cache = KeyCache::new(store);
        assert!(!cache.is_warm("alice"));
        assert_eq!(cache.get("alice").await.unwrap(), Some(key));
        assert!(cache.is_warm("alice"));
    }

    #[tokio::test]
    async fn test_durable_failure_keeps_memory_copy() {
        let (cache, store) = cache_with_store();
        store.set_fail_writes(true);
        let key = CryptoKey::generate().unwrap();

        let outcome = cache.set("alice", &key).await.unwrap();
        assert!(matches!(
            outcome,
            KeyCacheWrite::MemoryOnly(VaultError::StorageUnavailable(_))
        ));
        assert_eq!(cache.get("alice").await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_removed() {
        let (cache, store) = cache_with_store();
        store.set("key-cache:alice", "not a key").await.unwrap();

        assert_eq!(cache.get("alice").await.unwrap(), None);
        assert_eq!(store.get("key-cache:alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_all_removes_only_cache_entries() {
        let (cache, store) = cache_with_store();
        cache.set("alice", &CryptoKey::generate().unwrap()).await.unwrap();
        cache.set("bob", &CryptoKey::generate().unwrap()).await.unwrap();
        store.set("list-storage-todo", "{}").await.unwrap();

        cache.clear_all().await.unwrap();

        assert_eq!(cache.get("alice").await.unwrap(), None);
        assert_eq!(cache.get("bob").await.unwrap(), None);
        assert_eq!(store.keys().await.unwrap(), vec!["list-storage-todo".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_single_user() {
        let (cache, _) = cache_with_store();
        let bob_key = CryptoKey::generate().unwrap();
        cache.set("alice", &CryptoKey::generate().unwrap()).await.unwrap();
        cache.set("bob", &bob_key).await.unwrap();

        cache.clear("alice").await.unwrap();

        assert_eq!(cache.get("alice").await.unwrap(), None);
        assert_eq!(cache.get("bob").await.unwrap(), Some(bob_key));
    }
}
