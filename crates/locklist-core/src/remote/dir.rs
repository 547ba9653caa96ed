//! Directory-backed remote store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<uid>/profile.json
//! <root>/<uid>/docs/<storage_key>.json
//! ```
//!
//! Point two devices at the same (synced or network) directory and they see
//! each other's documents. Writes are atomic; subscriptions poll.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{RemoteStore, RemoteSubscription};
use crate::error::{Result, VaultError};
use crate::fs::{is_temp_file, write_atomic};
use crate::types::{validate_storage_key, ListDocument, RemoteProfile};

const PROFILE_FILE: &str = "profile.json";
const DOCS_DIR: &str = "docs";

#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
    poll_interval: Duration,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, uid: &str) -> Result<PathBuf> {
        validate_uid(uid)?;
        Ok(self.root.join(uid))
    }

    fn docs_dir(&self, uid: &str) -> Result<PathBuf> {
        Ok(self.user_dir(uid)?.join(DOCS_DIR))
    }

    fn document_path(&self, uid: &str, storage_key: &str) -> Result<PathBuf> {
        validate_storage_key(storage_key)?;
        Ok(self.docs_dir(uid)?.join(format!("{}.json", storage_key)))
    }
}

/// User ids become directory names; refuse anything that could escape the root.
fn validate_uid(uid: &str) -> Result<()> {
    let unsafe_uid = uid.is_empty()
        || uid == "."
        || uid == ".."
        || uid.contains(['/', '\\', '\0']);
    if unsafe_uid {
        return Err(VaultError::InvalidInput(format!(
            "user id {:?} cannot be used as a directory name",
            uid
        )));
    }
    Ok(())
}

fn network_error(context: &str, err: impl std::fmt::Display) -> VaultError {
    VaultError::Network(format!("{}: {}", context, err))
}

/// Run blocking file I/O off the async executor.
async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| VaultError::Other(format!("remote I/O task failed: {}", e)))?
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| VaultError::Validation(format!("{}: {}", path.display(), e))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(network_error(&path.display().to_string(), err)),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json).map_err(|e| network_error(&path.display().to_string(), e))
}

fn document_files(docs: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(docs) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(network_error(&docs.display().to_string(), err)),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            !is_temp_file(path) && path.extension().and_then(|ext| ext.to_str()) == Some("json")
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_all(docs: &Path) -> Result<Vec<ListDocument>> {
    let mut documents = Vec::new();
    for path in document_files(docs)? {
        match read_json::<ListDocument>(&path) {
            Ok(Some(document)) => documents.push(document),
            Ok(None) => {}
            Err(VaultError::Validation(reason)) => {
                warn!(path = %path.display(), reason = %reason, "skipping unreadable remote document");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(documents)
}

/// Cheap change detector: name, size and mtime of every document file.
fn fingerprint(docs: &Path) -> Result<Vec<(PathBuf, u64, Option<SystemTime>)>> {
    let mut entries = Vec::new();
    for path in document_files(docs)? {
        if let Ok(meta) = fs::metadata(&path) {
            entries.push((path, meta.len(), meta.modified().ok()));
        }
    }
    Ok(entries)
}

#[async_trait]
impl RemoteStore for DirRemote {
    async fn get_profile(&self, uid: &str) -> Result<Option<RemoteProfile>> {
        let path = self.user_dir(uid)?.join(PROFILE_FILE);
        blocking(move || read_json(&path)).await
    }

    async fn put_profile(&self, uid: &str, profile: &RemoteProfile) -> Result<()> {
        let path = self.user_dir(uid)?.join(PROFILE_FILE);
        let profile = profile.clone();
        blocking(move || write_json(&path, &profile)).await
    }

    async fn get(&self, uid: &str, storage_key: &str) -> Result<Option<ListDocument>> {
        let path = self.document_path(uid, storage_key)?;
        blocking(move || read_json(&path)).await
    }

    async fn put(&self, uid: &str, document: &ListDocument) -> Result<()> {
        let path = self.document_path(uid, &document.storage_key)?;
        let document = document.clone();
        blocking(move || write_json(&path, &document)).await
    }

    async fn delete(&self, uid: &str, storage_key: &str) -> Result<()> {
        let path = self.document_path(uid, storage_key)?;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(network_error(&path.display().to_string(), err)),
        })
        .await
    }

    async fn list_all(&self, uid: &str) -> Result<Vec<ListDocument>> {
        let docs = self.docs_dir(uid)?;
        blocking(move || read_all(&docs)).await
    }

    async fn subscribe(&self, uid: &str) -> Result<RemoteSubscription> {
        let docs = self.docs_dir(uid)?;
        let interval = self.poll_interval;
        let (sender, receiver) = mpsc::unbounded_channel();

        let initial_docs = docs.clone();
        let (initial_print, initial) = blocking(move || {
            Ok((fingerprint(&initial_docs)?, read_all(&initial_docs)?))
        })
        .await?;
        let _ = sender.send(initial);

        let uid = uid.to_string();
        let worker = tokio::spawn(async move {
            let mut last = initial_print;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                let poll_docs = docs.clone();
                let print = match blocking(move || fingerprint(&poll_docs)).await {
                    Ok(print) => print,
                    Err(err) => {
                        warn!(uid = %uid, error = %err, "remote poll failed");
                        continue;
                    }
                };
                if print == last {
                    continue;
                }
                let read_docs = docs.clone();
                match blocking(move || read_all(&read_docs)).await {
                    Ok(snapshot) => {
                        debug!(uid = %uid, documents = snapshot.len(), "remote directory changed");
                        last = print;
                        if sender.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(uid = %uid, error = %err, "remote read failed"),
                }
            }
        });

        Ok(RemoteSubscription::with_worker(receiver, worker))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::EncryptedRecord;

    fn document(key: &str, ciphertext: &str) -> ListDocument {
        ListDocument {
            title: "To Do".to_string(),
            storage_key: key.to_string(),
            records: vec![EncryptedRecord {
                id: uuid::Uuid::new_v4(),
                ciphertext: ciphertext.to_string(),
            }],
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_documents_and_profile_persist_as_files() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(dir.path(), Duration::from_millis(20));

        assert!(remote.get_profile("alice").await.unwrap().is_none());
        let profile = RemoteProfile {
            verification_hash: Some("ab".repeat(32)),
            kdf_iterations: Some(100_000),
            key_check: Some("cd".repeat(32)),
            created_at: Some(Utc::now()),
        };
        remote.put_profile("alice", &profile).await.unwrap();
        remote
            .put("alice", &document("list-storage-todo", "AAAA"))
            .await
            .unwrap();

        assert!(dir.path().join("alice/profile.json").exists());
        assert!(dir.path().join("alice/docs/list-storage-todo.json").exists());

        let other_device = DirRemote::new(dir.path(), Duration::from_millis(20));
        assert_eq!(other_device.get_profile("alice").await.unwrap(), Some(profile));
        assert_eq!(other_device.list_all("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(dir.path(), Duration::from_millis(20));
        remote
            .put("alice", &document("list-storage-todo", "AAAA"))
            .await
            .unwrap();

        remote.delete("alice", "list-storage-todo").await.unwrap();
        remote.delete("alice", "list-storage-todo").await.unwrap();
        assert!(remote.list_all("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(dir.path(), Duration::from_millis(20));
        assert!(matches!(
            remote.get_profile("../etc").await,
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            remote.get("alice", "../../secret").await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_sees_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let reader = DirRemote::new(dir.path(), Duration::from_millis(20));
        let writer = DirRemote::new(dir.path(), Duration::from_millis(20));

        let mut subscription = reader.subscribe("alice").await.unwrap();
        assert!(subscription.next().await.unwrap().is_empty());

        writer
            .put("alice", &document("list-storage-ideas", "BBBB"))
            .await
            .unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].storage_key, "list-storage-ideas");
    }
}
