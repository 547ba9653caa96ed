//! Sync coordinator.
//!
//! Reconciles the plaintext lists on the device with the encrypted documents
//! on the remote for one signed-in user:
//!
//! - local edits (this process or another one sharing the store) are
//!   debounced per list, then sealed and upserted
//! - remote snapshots are opened and applied last-write-wins
//! - a content hash per list suppresses writes that would change nothing
//!
//! The hash last agreed with the remote is also kept in the durable store
//! under `sync-meta:<uid>:<storage_key>`, so processes sharing the store and
//! later sessions on the device know what has already been pushed.
//!
//! One push or apply runs at a time. A failed push is reported, marked
//! pending and retried on the next edit or on [`SyncCoordinator::retry_pending`].
//!
//! Remote records that fail to open are reported and kept: every later push
//! of that list carries their ciphertext unchanged. A snapshot with such
//! records is first checked against the account profile; if the profile
//! names another key, the session stops applying and pushing.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::{decrypt_document, encrypt_list, CryptoKey, DecodedDocument};
use crate::error::{Result, VaultError};
use crate::events::{ChangeOrigin, EventBus};
use crate::local::LocalStore;
use crate::remote::{RemoteSubscription, SharedRemote};
use crate::storage::{SharedStore, StorageEvent, StorageEventKind, WriterId};
use crate::types::{
    is_list_key, validate_storage_key, ContentHash, EncryptedRecord, Identity, ListDocument,
};

/// Durable key prefix for last-pushed hashes.
pub const SYNC_META_PREFIX: &str = "sync-meta:";

/// Default quiet period before a local edit is pushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after the last edit of a list before it is pushed.
    pub debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing(String),
}

/// Remove every `sync-meta:*` marker from `store`.
pub async fn clear_sync_markers(store: &SharedStore) -> Result<usize> {
    let mut removed = 0;
    for key in store.keys().await? {
        if key.starts_with(SYNC_META_PREFIX) {
            store.remove(&key).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn stale_key_error() -> VaultError {
    VaultError::DecryptionFailed(
        "the account key has changed; unlock again with the current passphrase".to_string(),
    )
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    identity: Identity,
    key: CryptoKey,
    local: LocalStore,
    remote: SharedRemote,
    events: EventBus,
    config: SyncConfig,

    last_synced: Mutex<HashMap<String, ContentHash>>,
    timers: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    next_timer: AtomicU64,
    pending: Mutex<BTreeSet<String>>,
    status: watch::Sender<SyncStatus>,

    /// Remote records this key could not open, per list.
    unreadable: Mutex<HashMap<String, Vec<EncryptedRecord>>>,
    key_rejected: AtomicBool,

    /// Serializes pushes and remote applies.
    sync_lock: tokio::sync::Mutex<()>,

    local_feed: Mutex<Option<JoinHandle<()>>>,
    remote_feed: Mutex<Option<JoinHandle<()>>>,
    subscribed: AtomicBool,
    shut_down: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        identity: Identity,
        key: CryptoKey,
        local: LocalStore,
        remote: SharedRemote,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                identity,
                key,
                local,
                remote,
                events,
                config,
                last_synced: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                next_timer: AtomicU64::new(0),
                pending: Mutex::new(BTreeSet::new()),
                status,
                unreadable: Mutex::new(HashMap::new()),
                key_rejected: AtomicBool::new(false),
                sync_lock: tokio::sync::Mutex::new(()),
                local_feed: Mutex::new(None),
                remote_feed: Mutex::new(None),
                subscribed: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Begin syncing: watch local changes, pull the remote state and
    /// subscribe to it.
    ///
    /// An unreachable remote is reported on the sync-error channel; the
    /// session still runs locally.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let feed = inner.local.durable().subscribe();
        *guard(&inner.local_feed) = Some(tokio::spawn(Inner::watch_local(
            Arc::clone(inner),
            feed,
        )));

        inner.load_markers().await?;

        if let Err(err) = self.pull().await {
            if !matches!(err, VaultError::Network(_)) {
                return Err(err);
            }
            warn!(uid = %inner.identity.uid, error = %err, "initial pull failed; working offline");
            inner.events.emit_sync_error(None, &err);
        }

        if let Err(err) = inner.ensure_subscribed().await {
            warn!(uid = %inner.identity.uid, error = %err, "remote subscription unavailable");
            inner.events.emit_sync_error(None, &err);
        }

        info!(uid = %inner.identity.uid, "sync started");
        Ok(())
    }

    /// Fetch every remote document and apply it. Lists that exist only on
    /// the device are pushed.
    pub async fn pull(&self) -> Result<()> {
        let documents = self.inner.remote.list_all(&self.inner.identity.uid).await?;
        let remote_keys: BTreeSet<String> =
            documents.iter().map(|doc| doc.storage_key.clone()).collect();
        self.inner.apply_snapshot(documents).await;

        for key in self.inner.local.list_keys().await? {
            if !remote_keys.contains(&key) {
                debug!(storage_key = %key, "list exists only on device; pushing");
                self.inner.push(&key).await;
            }
        }
        Ok(())
    }

    /// Push every list with unsynced changes now, cancelling armed timers.
    pub async fn flush(&self) -> Result<()> {
        let armed: Vec<(u64, JoinHandle<()>)> =
            guard(&self.inner.timers).drain().map(|(_, timer)| timer).collect();
        for (_, handle) in armed {
            handle.abort();
        }
        for key in self.inner.local.list_keys().await? {
            self.inner.push(&key).await;
        }
        Ok(())
    }

    /// Push every list with unsynced changes once more after
    /// [`shutdown`](Self::shutdown). Failures are returned, not retried.
    pub async fn final_flush(&self) -> Result<()> {
        let inner = &self.inner;
        let _sync = inner.sync_lock.lock().await;
        let mut first_error = None;
        for key in inner.local.list_keys().await? {
            if let Err(err) = inner.push_locked(&key).await {
                warn!(storage_key = %key, error = %err, "final push failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reconnect if needed and push every pending list.
    ///
    /// Returns how many lists are still pending afterwards.
    pub async fn retry_pending(&self) -> Result<usize> {
        if !self.inner.subscribed.load(Ordering::SeqCst) {
            if let Err(err) = self.inner.ensure_subscribed().await {
                debug!(error = %err, "still unable to subscribe");
            }
        }
        let keys: Vec<String> = guard(&self.inner.pending).iter().cloned().collect();
        for key in keys {
            self.inner.push(&key).await;
        }
        Ok(self.pending().len())
    }

    /// Delete a list on the remote, then on the device.
    pub async fn delete_list(&self, storage_key: &str) -> Result<()> {
        validate_storage_key(storage_key)?;
        let inner = &self.inner;
        let _sync = inner.sync_lock.lock().await;

        inner.cancel_timer(storage_key);
        inner
            .remote
            .delete(&inner.identity.uid, storage_key)
            .await?;

        guard(&inner.last_synced).remove(storage_key);
        guard(&inner.pending).remove(storage_key);
        guard(&inner.unreadable).remove(storage_key);
        inner
            .local
            .durable()
            .remove(&inner.marker_key(storage_key))
            .await?;
        inner.local.remove(storage_key).await?;
        inner
            .events
            .emit_records_changed(storage_key, ChangeOrigin::Local);
        info!(storage_key, "list deleted");
        Ok(())
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Lists whose last push failed.
    pub fn pending(&self) -> Vec<String> {
        guard(&self.inner.pending).iter().cloned().collect()
    }

    /// Whether any list has a debounce timer armed.
    pub fn has_armed_timers(&self) -> bool {
        !guard(&self.inner.timers).is_empty()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Whether the account profile has named a different key than this
    /// session's. Nothing is applied or pushed once it has.
    pub fn is_key_rejected(&self) -> bool {
        self.inner.key_rejected.load(Ordering::SeqCst)
    }

    /// Storage keys of lists holding remote records this key cannot open.
    pub fn unreadable_lists(&self) -> Vec<String> {
        let mut keys: Vec<String> = guard(&self.inner.unreadable).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel timers and subscriptions and wait for any in-flight push.
    pub async fn shutdown(&self) {
        self.inner.abort_all();
        let _sync = self.inner.sync_lock.lock().await;
        self.inner.status.send_replace(SyncStatus::Idle);
        info!(uid = %self.inner.identity.uid, "sync stopped");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.inner.abort_all();
    }
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn abort_all(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        for (_, (_, handle)) in guard(&self.timers).drain() {
            handle.abort();
        }
        if let Some(handle) = guard(&self.local_feed).take() {
            handle.abort();
        }
        if let Some(handle) = guard(&self.remote_feed).take() {
            handle.abort();
        }
        self.subscribed.store(false, Ordering::SeqCst);
    }

    fn marker_key(&self, storage_key: &str) -> String {
        format!("{}{}:{}", SYNC_META_PREFIX, self.identity.uid, storage_key)
    }

    fn is_synced(&self, storage_key: &str, hash: &ContentHash) -> bool {
        guard(&self.last_synced).get(storage_key) == Some(hash)
    }

    /// Record `hash` as agreed with the remote, in memory and on the device.
    async fn mark_synced(&self, storage_key: &str, hash: &ContentHash) {
        guard(&self.last_synced).insert(storage_key.to_string(), hash.clone());
        if let Err(err) = self
            .local
            .durable()
            .set(&self.marker_key(storage_key), hash.as_str())
            .await
        {
            warn!(storage_key, error = %err, "failed to persist sync marker");
        }
    }

    /// Seed the in-memory hashes from markers left by earlier sessions.
    async fn load_markers(&self) -> Result<()> {
        let prefix = format!("{}{}:", SYNC_META_PREFIX, self.identity.uid);
        let store = self.local.durable();
        for key in store.keys().await? {
            if let Some(storage_key) = key.strip_prefix(&prefix) {
                if let Some(hash) = store.get(&key).await? {
                    guard(&self.last_synced).insert(storage_key.to_string(), ContentHash(hash));
                }
            }
        }
        Ok(())
    }

    async fn ensure_subscribed(self: &Arc<Self>) -> Result<()> {
        if self.is_shut_down() {
            return Err(VaultError::InvalidState("sync is shut down".to_string()));
        }
        let subscription = self.remote.subscribe(&self.identity.uid).await?;
        self.subscribed.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(Inner::watch_remote(Arc::clone(self), subscription));
        if let Some(previous) = guard(&self.remote_feed).replace(handle) {
            previous.abort();
        }
        debug!(uid = %self.identity.uid, "subscribed to remote");
        Ok(())
    }

    async fn watch_local(self: Arc<Self>, mut feed: tokio::sync::broadcast::Receiver<StorageEvent>) {
        loop {
            match feed.recv().await {
                Ok(event) => {
                    if !is_list_key(&event.key) {
                        continue;
                    }
                    if event.writer == WriterId::External {
                        self.events
                            .emit_records_changed(&event.key, ChangeOrigin::Local);
                    }
                    match event.kind {
                        StorageEventKind::Set => self.on_local_change(&event.key).await,
                        StorageEventKind::Removed => self.cancel_timer(&event.key),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "local change feed lagged; rescanning lists");
                    match self.local.list_keys().await {
                        Ok(keys) => {
                            for key in keys {
                                self.on_local_change(&key).await;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to rescan local lists"),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn watch_remote(self: Arc<Self>, mut subscription: RemoteSubscription) {
        while let Some(documents) = subscription.next().await {
            if self.is_shut_down() {
                return;
            }
            self.apply_snapshot(documents).await;
        }
        self.subscribed.store(false, Ordering::SeqCst);
        warn!(uid = %self.identity.uid, "remote subscription ended");
    }

    async fn on_local_change(self: &Arc<Self>, storage_key: &str) {
        if self.is_shut_down() {
            return;
        }
        let list = match self.local.load(storage_key).await {
            Ok(Some(list)) => list,
            Ok(None) => {
                self.cancel_timer(storage_key);
                return;
            }
            Err(err) => {
                warn!(storage_key, error = %err, "failed to read changed list");
                self.events.emit_sync_error(Some(storage_key), &err);
                return;
            }
        };
        if self.is_synced(storage_key, &list.content_hash()) {
            return;
        }
        self.schedule(storage_key);
    }

    /// (Re)arm the debounce timer for `storage_key`.
    fn schedule(self: &Arc<Self>, storage_key: &str) {
        let generation = self.next_timer.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(self);
        let key = storage_key.to_string();
        let debounce = self.config.debounce;

        let mut timers = guard(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(&key, generation).await;
        });
        if let Some((_, previous)) = timers.insert(storage_key.to_string(), (generation, handle)) {
            previous.abort();
        }
        debug!(storage_key, "push scheduled");
    }

    fn cancel_timer(&self, storage_key: &str) {
        if let Some((_, handle)) = guard(&self.timers).remove(storage_key) {
            handle.abort();
        }
    }

    async fn fire(&self, storage_key: &str, generation: u64) {
        {
            let mut timers = guard(&self.timers);
            if timers.get(storage_key).map(|(g, _)| *g) == Some(generation) {
                timers.remove(storage_key);
            }
        }
        self.push(storage_key).await;
    }

    /// Push one list, recording failures instead of returning them.
    async fn push(&self, storage_key: &str) {
        let _sync = self.sync_lock.lock().await;
        if self.is_shut_down() {
            return;
        }

        self.status
            .send_replace(SyncStatus::Syncing(storage_key.to_string()));
        let outcome = self.push_locked(storage_key).await;
        self.status.send_replace(SyncStatus::Idle);

        match outcome {
            Ok(pushed) => {
                guard(&self.pending).remove(storage_key);
                if pushed {
                    debug!(storage_key, "pushed");
                }
            }
            Err(err) => {
                warn!(storage_key, error = %err, "push failed; will retry on next change");
                guard(&self.pending).insert(storage_key.to_string());
                self.events.emit_sync_error(Some(storage_key), &err);
            }
        }
    }

    async fn push_locked(&self, storage_key: &str) -> Result<bool> {
        if self.key_rejected.load(Ordering::SeqCst) {
            return Err(stale_key_error());
        }
        // Re-read: the list may have changed again or been removed since the
        // timer was armed.
        let list = match self.local.load(storage_key).await? {
            Some(list) => list,
            None => return Ok(false),
        };
        let hash = list.content_hash();
        if self.is_synced(storage_key, &hash) {
            return Ok(false);
        }

        let marker = self
            .local
            .durable()
            .get(&self.marker_key(storage_key))
            .await?;
        if marker.as_deref() == Some(hash.as_str()) {
            // Another process sharing the store already pushed this state.
            guard(&self.last_synced).insert(storage_key.to_string(), hash);
            return Ok(false);
        }

        let mut document = encrypt_list(&list, &self.key)?;
        self.carry_unreadable(&mut document);
        self.remote.put(&self.identity.uid, &document).await?;
        self.mark_synced(storage_key, &hash).await;
        Ok(true)
    }

    /// Append the unopened remote records of this list, unless a local
    /// record has taken over the id.
    fn carry_unreadable(&self, document: &mut ListDocument) {
        let unreadable = guard(&self.unreadable);
        let Some(records) = unreadable.get(&document.storage_key) else {
            return;
        };
        for record in records {
            if !document.records.iter().any(|sealed| sealed.id == record.id) {
                document.records.push(record.clone());
            }
        }
    }

    fn remember_unreadable(&self, document: &ListDocument, failures: &[(Uuid, VaultError)]) {
        let mut unreadable = guard(&self.unreadable);
        if failures.is_empty() {
            unreadable.remove(&document.storage_key);
            return;
        }
        let kept: Vec<EncryptedRecord> = document
            .records
            .iter()
            .filter(|record| failures.iter().any(|(id, _)| *id == record.id))
            .cloned()
            .collect();
        unreadable.insert(document.storage_key.clone(), kept);
    }

    /// Whether this snapshot must not be applied because the session key
    /// is no longer the account's. Only snapshots with unopened records
    /// consult the profile.
    async fn key_is_stale(&self, decoded: &[DecodedDocument]) -> bool {
        if self.key_rejected.load(Ordering::SeqCst) {
            return true;
        }
        if decoded.iter().all(|doc| doc.failures.is_empty()) {
            return false;
        }

        match self.remote.get_profile(&self.identity.uid).await {
            Ok(Some(profile)) if !profile.accepts_key(&self.key) => {
                warn!(uid = %self.identity.uid, "remote lists are sealed with another key; sync paused");
                self.key_rejected.store(true, Ordering::SeqCst);
                self.events.emit_sync_error(None, &stale_key_error());
                true
            }
            Ok(_) => false,
            Err(err) => {
                warn!(uid = %self.identity.uid, error = %err, "could not check key against profile");
                // Nothing opened and the key cannot be checked; wait for the next snapshot.
                decoded.iter().all(|doc| doc.list.records.is_empty())
            }
        }
    }

    async fn apply_snapshot(self: &Arc<Self>, documents: Vec<ListDocument>) {
        let _sync = self.sync_lock.lock().await;
        if self.is_shut_down() {
            return;
        }
        let decoded: Vec<DecodedDocument> = documents
            .iter()
            .map(|document| decrypt_document(document, &self.key))
            .collect();
        if self.key_is_stale(&decoded).await {
            return;
        }
        for (document, decoded) in documents.iter().zip(decoded) {
            if let Err(err) = self.apply_document(document, decoded).await {
                warn!(storage_key = %document.storage_key, error = %err, "failed to apply remote list");
                self.events
                    .emit_sync_error(Some(&document.storage_key), &err);
            }
        }
    }

    async fn apply_document(
        self: &Arc<Self>,
        document: &ListDocument,
        decoded: DecodedDocument,
    ) -> Result<()> {
        let storage_key = document.storage_key.as_str();
        validate_storage_key(storage_key)?;

        for (record_id, err) in &decoded.failures {
            warn!(storage_key, %record_id, "keeping record that failed to decrypt");
            self.events.emit_sync_error(Some(storage_key), err);
        }
        self.remember_unreadable(document, &decoded.failures);
        let remote_list = decoded.list;
        let remote_hash = remote_list.content_hash();

        let local_list = match self.local.load(storage_key).await? {
            Some(list) => list,
            None => {
                debug!(storage_key, "creating list from remote");
                self.mark_synced(storage_key, &remote_hash).await;
                self.local.save_exact(&remote_list).await?;
                self.events
                    .emit_records_changed(storage_key, ChangeOrigin::Remote);
                return Ok(());
            }
        };

        let local_hash = local_list.content_hash();
        if local_hash == remote_hash {
            if !self.is_synced(storage_key, &remote_hash) {
                self.mark_synced(storage_key, &remote_hash).await;
            }
            // Same content; adopt the remote timestamp so devices converge.
            if local_list.last_modified != remote_list.last_modified {
                self.local.save_exact(&remote_list).await?;
            }
            return Ok(());
        }

        let has_unsynced_edit = guard(&self.last_synced)
            .get(storage_key)
            .map(|synced| synced != &local_hash)
            .unwrap_or(false);
        if has_unsynced_edit && local_list.last_modified > remote_list.last_modified {
            debug!(storage_key, "local edit is newer than remote; keeping it");
            self.schedule(storage_key);
            return Ok(());
        }

        debug!(storage_key, "applying remote list");
        self.cancel_timer(storage_key);
        guard(&self.pending).remove(storage_key);
        self.mark_synced(storage_key, &remote_hash).await;
        self.local.save_exact(&remote_list).await?;
        self.events
            .emit_records_changed(storage_key, ChangeOrigin::Remote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::storage::MemoryStore;
    use crate::crypto::encrypt;
    use crate::error::ErrorKind;
    use crate::types::{default_lists, LocalList, Record, RemoteProfile};

    struct Fixture {
        local: LocalStore,
        remote: MemoryRemote,
        events: EventBus,
        coordinator: SyncCoordinator,
    }

    async fn fixture(debounce_ms: u64) -> Fixture {
        let local = LocalStore::new(Arc::new(MemoryStore::new()));
        local.ensure_defaults(&default_lists()).await.unwrap();
        let remote = MemoryRemote::new();
        let events = EventBus::new();
        let coordinator = SyncCoordinator::new(
            Identity::new("alice"),
            CryptoKey::generate().unwrap(),
            local.clone(),
            Arc::new(remote.clone()),
            events.clone(),
            SyncConfig {
                debounce: Duration::from_millis(debounce_ms),
            },
        );
        coordinator.start().await.unwrap();
        Fixture {
            local,
            remote,
            events,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pushes_device_only_lists() {
        let f = fixture(500).await;
        assert_eq!(f.remote.write_count(), 3);
        let docs = f.remote.list_all("alice").await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(f.coordinator.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_collapse_into_one_push() {
        let f = fixture(500).await;
        let baseline = f.remote.write_count();

        f.local.add_record("list-storage-todo", "first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        f.local.add_record("list-storage-todo", "second").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.remote.write_count(), baseline);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.remote.write_count(), baseline + 1);

        let doc = f.remote.get("alice", "list-storage-todo").await.unwrap().unwrap();
        assert_eq!(doc.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_content_is_not_pushed() {
        let f = fixture(100).await;
        let baseline = f.remote.write_count();

        let mut list = f.local.require("list-storage-ideas").await.unwrap();
        f.local.save(&mut list).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(f.remote.write_count(), baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_push_is_pending_until_retry() {
        let f = fixture(100).await;
        let mut errors = f.events.sync_errors();
        f.remote.set_online(false);

        f.local.add_record("list-storage-todo", "offline").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.coordinator.pending(), vec!["list-storage-todo".to_string()]);
        let error = errors.recv().await.unwrap();
        assert_eq!(error.kind, crate::error::ErrorKind::NetworkFailure);

        f.remote.set_online(true);
        assert_eq!(f.coordinator.retry_pending().await.unwrap(), 0);
        let doc = f.remote.get("alice", "list-storage-todo").await.unwrap().unwrap();
        assert_eq!(doc.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_is_applied_locally() {
        let f = fixture(100).await;
        let mut changes = f.events.records_changed();

        let mut list = LocalList::new("Shopping", "list-storage-shopping");
        list.records.push(Record::new("bread"));
        list.last_modified = chrono::Utc::now() + chrono::Duration::seconds(5);
        let doc = encrypt_list(&list, &f.coordinator.inner.key).unwrap();
        f.remote.put("alice", &doc).await.unwrap();

        let change = loop {
            let change = changes.recv().await.unwrap();
            if change.origin == ChangeOrigin::Remote {
                break change;
            }
        };
        assert_eq!(change.storage_key, "list-storage-shopping");
        let local = f.local.require("list-storage-shopping").await.unwrap();
        assert_eq!(local.records, list.records);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_unsynced_local_edit_survives_older_snapshot() {
        let f = fixture(10_000).await;
        let stale = f.remote.get("alice", "list-storage-todo").await.unwrap().unwrap();

        f.local.add_record("list-storage-todo", "keep me").await.unwrap();
        tokio::task::yield_now().await;

        f.coordinator.inner.apply_snapshot(vec![stale]).await;
        let local = f.local.require("list-storage-todo").await.unwrap();
        assert_eq!(local.records.len(), 1);
    }

    fn in_future(list: &mut LocalList) {
        list.last_modified = chrono::Utc::now() + chrono::Duration::seconds(5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_remote_record_survives_next_push() {
        let f = fixture(100).await;
        let mut errors = f.events.sync_errors();
        let foreign = CryptoKey::generate().unwrap();

        let mut list = LocalList::new("To Do", "list-storage-todo");
        list.records.push(Record::new("readable"));
        in_future(&mut list);
        let mut doc = encrypt_list(&list, &f.coordinator.inner.key).unwrap();
        let sealed_elsewhere = encrypt(&Record::new("sealed elsewhere"), &foreign).unwrap();
        doc.records.push(sealed_elsewhere.clone());
        f.remote.put("alice", &doc).await.unwrap();

        let error = errors.recv().await.unwrap();
        assert_eq!(error.kind, ErrorKind::DecryptionFailed);
        assert_eq!(error.storage_key.as_deref(), Some("list-storage-todo"));
        assert_eq!(f.coordinator.unreadable_lists(), vec!["list-storage-todo".to_string()]);

        let local = f.local.require("list-storage-todo").await.unwrap();
        assert_eq!(local.records.len(), 1);

        f.local.add_record("list-storage-todo", "fresh").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let pushed = f.remote.get("alice", "list-storage-todo").await.unwrap().unwrap();
        assert_eq!(pushed.records.len(), 3);
        assert!(pushed.records.contains(&sealed_elsewhere));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_with_bad_document_still_applies_good_one() {
        let f = fixture(100).await;
        // Let the subscription's first snapshot land.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut errors = f.events.sync_errors();
        let key = f.coordinator.inner.key.clone();
        let foreign = CryptoKey::generate().unwrap();

        let mut shopping = LocalList::new("Shopping", "list-storage-shopping");
        shopping.records.push(Record::new("bread"));
        in_future(&mut shopping);
        let mut ideas = LocalList::new("Ideas", "list-storage-ideas");
        ideas.records.push(Record::new("from another key"));
        in_future(&mut ideas);
        let bad = encrypt_list(&ideas, &foreign).unwrap();
        let good = encrypt_list(&shopping, &key).unwrap();

        f.coordinator
            .inner
            .apply_snapshot(vec![bad.clone(), good])
            .await;

        let error = errors.recv().await.unwrap();
        assert_eq!(error.kind, ErrorKind::DecryptionFailed);
        assert_eq!(error.storage_key.as_deref(), Some("list-storage-ideas"));
        let applied = f.local.require("list-storage-shopping").await.unwrap();
        assert_eq!(applied.records, shopping.records);
        assert!(!f.coordinator.is_key_rejected());

        f.local.add_record("list-storage-ideas", "mine").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let pushed = f.remote.get("alice", "list-storage-ideas").await.unwrap().unwrap();
        assert_eq!(pushed.records.len(), 2);
        assert!(pushed.records.contains(&bad.records[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_under_another_account_key_is_not_applied() {
        let f = fixture(100).await;
        let mut errors = f.events.sync_errors();
        let rotated = CryptoKey::generate().unwrap();
        f.local.add_record("list-storage-todo", "keep me").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let baseline = f.remote.write_count();

        let profile = RemoteProfile {
            key_check: Some(rotated.check_value()),
            ..RemoteProfile::default()
        };
        f.remote.put_profile("alice", &profile).await.unwrap();
        let mut todo = LocalList::new("To Do", "list-storage-todo");
        todo.records.push(Record::new("re-sealed"));
        in_future(&mut todo);
        f.coordinator
            .inner
            .apply_snapshot(vec![encrypt_list(&todo, &rotated).unwrap()])
            .await;

        assert!(f.coordinator.is_key_rejected());
        let error = errors.recv().await.unwrap();
        assert_eq!(error.kind, ErrorKind::DecryptionFailed);
        assert_eq!(error.storage_key, None);
        let local = f.local.require("list-storage-todo").await.unwrap();
        assert_eq!(local.records.len(), 1);
        assert_eq!(local.records[0].text, "keep me");

        f.local.add_record("list-storage-todo", "offline edit").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.remote.write_count(), baseline);
        assert_eq!(f.coordinator.pending(), vec!["list-storage-todo".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_list_removes_both_sides() {
        let f = fixture(100).await;
        f.coordinator.delete_list("list-storage-ideas").await.unwrap();

        assert!(f.local.load("list-storage-ideas").await.unwrap().is_none());
        assert!(f.remote.get("alice", "list-storage-ideas").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_pushing() {
        let f = fixture(100).await;
        let baseline = f.remote.write_count();

        f.local.add_record("list-storage-todo", "late").await.unwrap();
        tokio::task::yield_now().await;
        f.coordinator.shutdown().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(f.remote.write_count(), baseline);
        assert!(!f.coordinator.has_armed_timers());
        assert!(!f.coordinator.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_markers_are_written_and_cleared() {
        let f = fixture(100).await;
        let store = f.local.durable().clone();
        assert!(store
            .get("sync-meta:alice:list-storage-todo")
            .await
            .unwrap()
            .is_some());

        assert_eq!(clear_sync_markers(&store).await.unwrap(), 3);
        assert!(store
            .get("sync-meta:alice:list-storage-todo")
            .await
            .unwrap()
            .is_none());
    }
}
