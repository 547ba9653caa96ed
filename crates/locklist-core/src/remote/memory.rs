//! In-process remote store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RemoteStore, RemoteSubscription};
use crate::error::{Result, VaultError};
use crate::types::{ListDocument, RemoteProfile};

/// Remote store kept in memory.
///
/// Clones share the same data, so two "devices" can be pointed at one
/// remote. `set_online(false)` makes every call fail with a network error.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Mutex<HashMap<String, UserData>>,
    subscribers: Mutex<Vec<Subscriber>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

#[derive(Default)]
struct UserData {
    profile: Option<RemoteProfile>,
    documents: BTreeMap<String, ListDocument>,
}

struct Subscriber {
    uid: String,
    sender: mpsc::UnboundedSender<Vec<ListDocument>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining connectivity. Coming back online sends
    /// every subscriber a fresh snapshot.
    pub fn set_online(&self, online: bool) {
        let was_offline = self.inner.offline.swap(!online, Ordering::SeqCst);
        if online && was_offline {
            let uids: Vec<String> = match self.inner.subscribers.lock() {
                Ok(subscribers) => subscribers.iter().map(|s| s.uid.clone()).collect(),
                Err(_) => return,
            };
            for uid in uids {
                self.notify(&uid);
            }
        }
    }

    pub fn is_online(&self) -> bool {
        !self.inner.offline.load(Ordering::SeqCst)
    }

    /// Document writes (puts and deletes) accepted so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(VaultError::Network("remote store is offline".to_string()))
        }
    }

    fn lock_users(&self) -> Result<MutexGuard<'_, HashMap<String, UserData>>> {
        self.inner
            .users
            .lock()
            .map_err(|_| VaultError::Network("remote store poisoned".to_string()))
    }

    fn snapshot(&self, uid: &str) -> Result<Vec<ListDocument>> {
        Ok(self
            .lock_users()?
            .get(uid)
            .map(|user| user.documents.values().cloned().collect())
            .unwrap_or_default())
    }

    fn notify(&self, uid: &str) {
        let snapshot = match self.snapshot(uid) {
            Ok(snapshot) => snapshot,
            Err(_) => return,
        };
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|subscriber| {
                if subscriber.uid != uid {
                    return !subscriber.sender.is_closed();
                }
                subscriber.sender.send(snapshot.clone()).is_ok()
            });
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_profile(&self, uid: &str) -> Result<Option<RemoteProfile>> {
        self.check_online()?;
        Ok(self
            .lock_users()?
            .get(uid)
            .and_then(|user| user.profile.clone()))
    }

    async fn put_profile(&self, uid: &str, profile: &RemoteProfile) -> Result<()> {
        self.check_online()?;
        self.lock_users()?
            .entry(uid.to_string())
            .or_default()
            .profile = Some(profile.clone());
        Ok(())
    }

    async fn get(&self, uid: &str, storage_key: &str) -> Result<Option<ListDocument>> {
        self.check_online()?;
        Ok(self
            .lock_users()?
            .get(uid)
            .and_then(|user| user.documents.get(storage_key).cloned()))
    }

    async fn put(&self, uid: &str, document: &ListDocument) -> Result<()> {
        self.check_online()?;
        self.lock_users()?
            .entry(uid.to_string())
            .or_default()
            .documents
            .insert(document.storage_key.clone(), document.clone());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.notify(uid);
        Ok(())
    }

    async fn delete(&self, uid: &str, storage_key: &str) -> Result<()> {
        self.check_online()?;
        let removed = self
            .lock_users()?
            .get_mut(uid)
            .and_then(|user| user.documents.remove(storage_key))
            .is_some();
        if removed {
            self.inner.writes.fetch_add(1, Ordering::SeqCst);
            self.notify(uid);
        }
        Ok(())
    }

    async fn list_all(&self, uid: &str) -> Result<Vec<ListDocument>> {
        self.check_online()?;
        self.snapshot(uid)
    }

    async fn subscribe(&self, uid: &str) -> Result<RemoteSubscription> {
        self.check_online()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(self.snapshot(uid)?);
        self.inner
            .subscribers
            .lock()
            .map_err(|_| VaultError::Network("remote store poisoned".to_string()))?
            .push(Subscriber {
                uid: uid.to_string(),
                sender,
            });
        Ok(RemoteSubscription::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn document(key: &str) -> ListDocument {
        ListDocument {
            title: "To Do".to_string(),
            storage_key: key.to_string(),
            records: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_documents_are_per_user() {
        let remote = MemoryRemote::new();
        remote.put("alice", &document("list-storage-todo")).await.unwrap();

        assert!(remote.get("alice", "list-storage-todo").await.unwrap().is_some());
        assert!(remote.get("bob", "list-storage-todo").await.unwrap().is_none());
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_rejects_calls() {
        let remote = MemoryRemote::new();
        remote.set_online(false);
        assert!(matches!(
            remote.put("alice", &document("list-storage-todo")).await,
            Err(VaultError::Network(_))
        ));
        assert!(matches!(
            remote.get_profile("alice").await,
            Err(VaultError::Network(_))
        ));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_gets_initial_and_later_snapshots() {
        let remote = MemoryRemote::new();
        remote.put("alice", &document("list-storage-todo")).await.unwrap();

        let mut subscription = remote.subscribe("alice").await.unwrap();
        assert_eq!(subscription.next().await.unwrap().len(), 1);

        remote.put("alice", &document("list-storage-ideas")).await.unwrap();
        assert_eq!(subscription.next().await.unwrap().len(), 2);

        remote.delete("alice", "list-storage-todo").await.unwrap();
        assert_eq!(subscription.next().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let remote = MemoryRemote::new();
        let subscription = remote.subscribe("alice").await.unwrap();
        subscription.unsubscribe();

        remote.put("alice", &document("list-storage-todo")).await.unwrap();
        assert!(remote.inner.subscribers.lock().unwrap().is_empty());
    }
}
