//! Durable per-device key/value storage.
//!
//! The `DurableStore` trait is the single storage abstraction behind both the
//! plaintext list store and the device key cache. Two backends exist:
//!
//! - `SqliteStore`: durable, indexed, shared between processes on the device
//! - `MemoryStore`: a simple map, used when the durable store is unavailable
//!   and in tests
//!
//! The backend is chosen once, in [`open_durable_store`]; nothing else
//! decides between them.
//!
//! Every store exposes a change feed. Writes made through a handle are
//! tagged with that handle's [`WriterId`]; writes made by another process
//! (another "tab") are tagged [`WriterId::External`].

pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Capacity of each store's change feed.
pub const EVENT_CAPACITY: usize = 256;

/// Identifies who wrote a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterId {
    /// A handle in this process.
    Handle(u64),
    /// Another process sharing the same durable store.
    External,
}

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEventKind {
    Set,
    Removed,
}

/// One change-feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub kind: StorageEventKind,
    pub writer: WriterId,
}

/// Which backend a store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Memory,
    /// Implemented outside this crate (an OS keychain, for example).
    Custom,
}

/// Async key → string map.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// The id stamped on events for writes made through this handle.
    fn writer_id(&self) -> WriterId;

    /// Read a value. Returns `Ok(None)` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every key.
    async fn clear(&self) -> Result<()>;

    /// Subscribe to the change feed.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Shared handle to a durable store.
pub type SharedStore = Arc<dyn DurableStore>;

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database path; `None` selects the in-memory backend.
    pub path: Option<PathBuf>,

    /// How often the SQLite backend checks for writes by other processes.
    pub watch_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            watch_interval: Duration::from_millis(500),
        }
    }
}

/// Open the configured store, degrading to memory if SQLite is unavailable.
pub fn open_durable_store(config: &StoreConfig) -> SharedStore {
    match config.path.as_ref() {
        Some(path) => match SqliteStore::open(path, config.watch_interval) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "durable store unavailable; continuing in memory only"
                );
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}

static NEXT_WRITER: AtomicU64 = AtomicU64::new(1);

/// A fresh writer id for a new store handle.
pub fn next_writer_id() -> WriterId {
    WriterId::Handle(NEXT_WRITER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_path_is_memory() {
        let store = open_durable_store(&StoreConfig::default());
        assert_eq!(store.backend(), Backend::Memory);
    }

    #[tokio::test]
    async fn test_unopenable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let config = StoreConfig {
            path: Some(dir.path().to_path_buf()),
            ..StoreConfig::default()
        };
        let store = open_durable_store(&config);
        assert_eq!(store.backend(), Backend::Memory);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_sqlite_path_opens_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            path: Some(dir.path().join("store.db")),
            ..StoreConfig::default()
        };
        let store = open_durable_store(&config);
        assert_eq!(store.backend(), Backend::Sqlite);
    }

    #[test]
    fn test_writer_ids_are_unique() {
        assert_ne!(next_writer_id(), next_writer_id());
    }
}
