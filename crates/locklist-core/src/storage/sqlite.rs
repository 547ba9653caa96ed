//! SQLite store backend.
//!
//! One table of `(key, value, rev)`. Every write bumps a store-wide revision
//! counter, so a watcher can tell which keys another process touched after
//! `PRAGMA data_version` reports a foreign commit.
//!
//! Statements run on Tokio's blocking pool behind one shared connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    next_writer_id, Backend, DurableStore, StorageEvent, StorageEventKind, WriterId,
    EVENT_CAPACITY,
};
use crate::error::{Result, VaultError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    rev INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS kv_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    rev INTEGER NOT NULL
);
INSERT OR IGNORE INTO kv_meta (id, rev) VALUES (1, 0);
";

/// SQLite-backed durable store.
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    writer: WriterId,
    events: broadcast::Sender<StorageEvent>,
    /// Last revision seen per key, shared with the watcher.
    seen: Arc<Mutex<HashMap<String, i64>>>,
    watcher: Option<JoinHandle<()>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// When called inside a Tokio runtime, a watcher task polls for writes
    /// made by other processes every `watch_interval`.
    pub fn open(path: &Path, watch_interval: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VaultError::StorageUnavailable(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            VaultError::StorageUnavailable(format!(
                "Failed to open store {}: {}",
                path.display(),
                e
            ))
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA).map_err(|e| {
            VaultError::StorageUnavailable(format!(
                "Failed to initialize store {}: {}",
                path.display(),
                e
            ))
        })?;

        let seen = Self::snapshot_revisions(&conn)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut store = Self {
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
            writer: next_writer_id(),
            events,
            seen: Arc::new(Mutex::new(seen)),
            watcher: None,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                store.watcher = Some(runtime.spawn(watch_external_writes(
                    Arc::clone(&store.conn),
                    Arc::clone(&store.seen),
                    store.events.clone(),
                    watch_interval,
                )));
            }
            Err(_) => debug!(
                path = %path.display(),
                "no async runtime; external writes will not be observed"
            ),
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `task` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let shared = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = lock_conn(&shared)?;
            task(&mut *conn)
        })
        .await
        .map_err(|e| VaultError::Storage(format!("store I/O task failed: {}", e)))?
    }

    fn remember(&self, key: &str, rev: Option<i64>) {
        if let Ok(mut seen) = self.seen.lock() {
            match rev {
                Some(rev) => {
                    seen.insert(key.to_string(), rev);
                }
                None => {
                    seen.remove(key);
                }
            }
        }
    }

    fn emit(&self, key: &str, kind: StorageEventKind) {
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            kind,
            writer: self.writer,
        });
    }

    fn snapshot_revisions(conn: &Connection) -> Result<HashMap<String, i64>> {
        let mut stmt = conn.prepare("SELECT key, rev FROM kv")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut map = HashMap::new();
        for row in rows {
            let (key, rev) = row?;
            map.insert(key, rev);
        }
        Ok(map)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn writer_id(&self) -> WriterId {
        self.writer
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (owned_key, owned_value) = (key.to_string(), value.to_string());
        let rev = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("UPDATE kv_meta SET rev = rev + 1 WHERE id = 1", [])?;
                let rev: i64 = tx.query_row("SELECT rev FROM kv_meta WHERE id = 1", [], |row| {
                    row.get(0)
                })?;
                tx.execute(
                    "INSERT INTO kv (key, value, rev) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, rev = excluded.rev",
                    params![owned_key, owned_value, rev],
                )?;
                tx.commit()?;
                Ok(rev)
            })
            .await?;
        self.remember(key, Some(rev));
        self.emit(key, StorageEventKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let owned_key = key.to_string();
        let removed = self
            .with_conn(move |conn| Ok(conn.execute("DELETE FROM kv WHERE key = ?1", params![owned_key])?))
            .await?;
        self.remember(key, None);
        if removed > 0 {
            self.emit(key, StorageEventKind::Removed);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        let removed = self
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                let keys = {
                    let mut stmt = tx.prepare("SELECT key FROM kv")?;
                    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()?
                };
                tx.execute("DELETE FROM kv", [])?;
                tx.commit()?;
                Ok(keys)
            })
            .await?;
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
        for key in removed {
            self.emit(&key, StorageEventKind::Removed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// Poll `PRAGMA data_version`; when another connection has committed, diff
/// key revisions against what this handle last saw and report the changes.
async fn watch_external_writes(
    conn: Arc<Mutex<Connection>>,
    seen: Arc<Mutex<HashMap<String, i64>>>,
    events: broadcast::Sender<StorageEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_version: Option<i64> = None;

    loop {
        ticker.tick().await;
        let polled = {
            let (conn, seen) = (Arc::clone(&conn), Arc::clone(&seen));
            tokio::task::spawn_blocking(move || {
                let mut version = last_version;
                poll_once(&conn, &seen, &mut version).map(|changes| (changes, version))
            })
            .await
        };
        match polled {
            Ok(Ok((changes, version))) => {
                last_version = version;
                for (key, kind) in changes {
                    let _ = events.send(StorageEvent {
                        key,
                        kind,
                        writer: WriterId::External,
                    });
                }
            }
            Ok(Err(err)) => warn!(error = %err, "failed to poll durable store for external writes"),
            Err(err) => warn!(error = %err, "store poll task failed"),
        }
    }
}

/// Lock the database connection, returning an error if the mutex is poisoned.
fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| VaultError::Storage("SQLite connection poisoned".to_string()))
}

fn poll_once(
    conn: &Mutex<Connection>,
    seen: &Mutex<HashMap<String, i64>>,
    last_version: &mut Option<i64>,
) -> Result<Vec<(String, StorageEventKind)>> {
    let conn = lock_conn(conn)?;
    let version: i64 = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
    let changed = last_version.map(|last| last != version).unwrap_or(false);
    *last_version = Some(version);
    if !changed {
        return Ok(Vec::new());
    }

    let current = SqliteStore::snapshot_revisions(&conn)?;
    drop(conn);

    let mut seen = seen
        .lock()
        .map_err(|_| VaultError::Storage("revision map poisoned".to_string()))?;
    let mut changes = Vec::new();
    for (key, rev) in &current {
        if seen.get(key) != Some(rev) {
            changes.push((key.clone(), StorageEventKind::Set));
        }
    }
    for key in seen.keys() {
        if !current.contains_key(key) {
            changes.push((key.clone(), StorageEventKind::Removed));
        }
    }
    *seen = current;
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(&dir.path().join("store.db"), Duration::from_millis(20)).unwrap()
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.set("list-storage-todo", "{\"a\":1}").await.unwrap();
        }
        let store = open(&dir);
        assert_eq!(
            store.get("list-storage-todo").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(store.keys().await.unwrap(), vec!["list-storage-todo".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.set("k", "1").await.unwrap();
        store.set("k", "2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_own_writes_are_tagged_with_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let mut feed = store.subscribe();
        store.set("k", "v").await.unwrap();
        let event = feed.recv().await.unwrap();
        assert_eq!(event.writer, store.writer_id());
        assert_eq!(event.kind, StorageEventKind::Set);
    }

    #[tokio::test]
    async fn test_other_process_writes_are_observed() {
        let dir = tempfile::tempdir().unwrap();
        let tab_one = open(&dir);
        let tab_two = open(&dir);
        let mut feed = tab_one.subscribe();

        // Let the watcher record the starting data_version.
        tokio::time::sleep(Duration::from_millis(60)).await;
        tab_two.set("list-storage-todo", "{}").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = feed.recv().await.unwrap();
                if event.writer == WriterId::External {
                    return event;
                }
            }
        })
        .await
        .expect("external write should be observed");
        assert_eq!(event.key, "list-storage-todo");
        assert_eq!(event.kind, StorageEventKind::Set);
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_stall_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open(&dir));
        store.set("k", "v").await.unwrap();

        let held = store.conn.lock().unwrap();
        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("k").await })
        };
        // The reader waits on the pool while this single-threaded runtime keeps going.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        drop(held);
        let value = reader.await.expect("reader task should succeed").unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }
}
