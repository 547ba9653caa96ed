//! OS keychain as a key-cache backend.
//!
//! The keychain has no enumeration API, so an index entry records which
//! accounts this store has written.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::broadcast;

use locklist_core::storage::{
    next_writer_id, Backend, DurableStore, StorageEvent, StorageEventKind, WriterId,
    EVENT_CAPACITY,
};
use locklist_core::{Result, VaultError};

use crate::constants::KEYCHAIN_SERVICE;

const INDEX_ACCOUNT: &str = "__index";

pub struct KeychainStore {
    service: String,
    writer: WriterId,
    events: broadcast::Sender<StorageEvent>,
}

impl KeychainStore {
    pub fn new() -> Self {
        Self::with_service(KEYCHAIN_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service: service.into(),
            writer: next_writer_id(),
            events,
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, account)
            .map_err(|e| VaultError::StorageUnavailable(format!("Keychain unavailable: {}", e)))
    }

    fn read(&self, account: &str) -> Result<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(VaultError::Storage(format!("Keychain read failed: {}", err))),
        }
    }

    fn write(&self, account: &str, value: &str) -> Result<()> {
        self.entry(account)?
            .set_password(value)
            .map_err(|e| VaultError::Storage(format!("Keychain write failed: {}", e)))
    }

    fn delete(&self, account: &str) -> Result<()> {
        match self.entry(account)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(VaultError::Storage(format!("Keychain delete failed: {}", err))),
        }
    }

    fn index(&self) -> Result<BTreeSet<String>> {
        match self.read(INDEX_ACCOUNT)? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_index(&self, index: &BTreeSet<String>) -> Result<()> {
        if index.is_empty() {
            return self.delete(INDEX_ACCOUNT);
        }
        let raw = serde_json::to_string(index)
            .map_err(|e| VaultError::Storage(format!("Keychain index encode failed: {}", e)))?;
        self.write(INDEX_ACCOUNT, &raw)
    }

    fn emit(&self, key: &str, kind: StorageEventKind) {
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            kind,
            writer: self.writer,
        });
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for KeychainStore {
    fn backend(&self) -> Backend {
        Backend::Custom
    }

    fn writer_id(&self) -> WriterId {
        self.writer
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value)?;
        let mut index = self.index()?;
        if index.insert(key.to_string()) {
            self.write_index(&index)?;
        }
        self.emit(key, StorageEventKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete(key)?;
        let mut index = self.index()?;
        if index.remove(key) {
            self.write_index(&index)?;
        }
        self.emit(key, StorageEventKind::Removed);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index()?.into_iter().collect())
    }

    async fn clear(&self) -> Result<()> {
        for key in self.index()? {
            self.delete(&key)?;
            self.emit(&key, StorageEventKind::Removed);
        }
        self.delete(INDEX_ACCOUNT)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
