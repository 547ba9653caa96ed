//! In-memory store backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    next_writer_id, Backend, DurableStore, StorageEvent, StorageEventKind, WriterId,
    EVENT_CAPACITY,
};
use crate::error::{Result, VaultError};

/// A map shared by every handle cloned from it.
///
/// `handle()` behaves like a second tab: same data and change feed, its own
/// writer id.
pub struct MemoryStore {
    shared: Arc<Shared>,
    writer: WriterId,
}

struct Shared {
    map: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                map: RwLock::new(HashMap::new()),
                events,
                fail_writes: AtomicBool::new(false),
            }),
            writer: next_writer_id(),
        }
    }

    /// Another handle onto the same data.
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            writer: next_writer_id(),
        }
    }

    /// Make every write fail with `StorageUnavailable` (reads still work).
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_map(&self) -> Result<RwLockReadGuard<'_, HashMap<String, String>>> {
        self.shared
            .map
            .read()
            .map_err(|_| VaultError::Storage("memory store poisoned".to_string()))
    }

    fn write_map(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, String>>> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::StorageUnavailable(
                "memory store rejected write".to_string(),
            ));
        }
        self.shared
            .map
            .write()
            .map_err(|_| VaultError::Storage("memory store poisoned".to_string()))
    }

    fn emit(&self, key: &str, kind: StorageEventKind) {
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_string(),
            kind,
            writer: self.writer,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn writer_id(&self) -> WriterId {
        self.writer
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_map()?
            .insert(key.to_string(), value.to_string());
        self.emit(key, StorageEventKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let removed = self.write_map()?.remove(key).is_some();
        if removed {
            self.emit(key, StorageEventKind::Removed);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.read_map()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let removed: Vec<String> = self.write_map()?.drain().map(|(key, _)| key).collect();
        for key in removed {
            self.emit(&key, StorageEventKind::Removed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        // Removing again is fine.
        store.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_share_data_and_feed() {
        let tab_one = MemoryStore::new();
        let tab_two = tab_one.handle();
        let mut feed = tab_one.subscribe();

        tab_two.set("list-storage-todo", "{}").await.unwrap();

        assert_eq!(
            tab_one.get("list-storage-todo").await.unwrap().as_deref(),
            Some("{}")
        );
        let event = feed.recv().await.unwrap();
        assert_eq!(event.key, "list-storage-todo");
        assert_eq!(event.writer, tab_two.writer_id());
        assert_ne!(event.writer, tab_one.writer_id());
    }

    #[tokio::test]
    async fn test_clear_emits_removals() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        let mut feed = store.subscribe();

        store.clear().await.unwrap();

        assert!(store.keys().await.unwrap().is_empty());
        let mut removed = vec![feed.recv().await.unwrap().key, feed.recv().await.unwrap().key];
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        store.set_fail_writes(true);

        assert!(matches!(
            store.set("a", "2").await,
            Err(VaultError::StorageUnavailable(_))
        ));
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
