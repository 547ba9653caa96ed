//! Plaintext lists on the device.
//!
//! `LocalStore` owns the `list-storage-*` keys of a durable store. Each key
//! holds one JSON-encoded [`LocalList`]. Writes land immediately; the
//! store's change feed is what tells the sync coordinator about them.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::storage::SharedStore;
use crate::types::{
    is_list_key, storage_key_for_title, validate_storage_key, with_random_suffix, DefaultList,
    LocalList, Record,
};

/// Attempts at finding a free storage key before giving up.
const MAX_KEY_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct LocalStore {
    store: SharedStore,
}

impl LocalStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The underlying durable store.
    pub fn durable(&self) -> &SharedStore {
        &self.store
    }

    pub async fn load(&self, storage_key: &str) -> Result<Option<LocalList>> {
        match self.store.get(storage_key).await? {
            Some(json) => {
                let list: LocalList = serde_json::from_str(&json).map_err(|e| {
                    VaultError::Validation(format!("list {} is corrupt: {}", storage_key, e))
                })?;
                Ok(Some(list))
            }
            None => Ok(None),
        }
    }

    /// Load a list that must exist.
    pub async fn require(&self, storage_key: &str) -> Result<LocalList> {
        self.load(storage_key)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("list {}", storage_key)))
    }

    /// Save a user edit, stamping `last_modified` with the current time.
    pub async fn save(&self, list: &mut LocalList) -> Result<()> {
        list.last_modified = Utc::now();
        self.save_exact(list).await
    }

    /// Save without touching `last_modified`.
    pub async fn save_exact(&self, list: &LocalList) -> Result<()> {
        validate_storage_key(&list.storage_key)?;
        let json = serde_json::to_string(list)?;
        self.store.set(&list.storage_key, &json).await
    }

    pub async fn remove(&self, storage_key: &str) -> Result<()> {
        self.store.remove(storage_key).await
    }

    /// Every list key, sorted.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|key| is_list_key(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub async fn load_all(&self) -> Result<Vec<LocalList>> {
        let mut lists = Vec::new();
        for key in self.list_keys().await? {
            if let Some(list) = self.load(&key).await? {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    /// Remove every list. Keys outside the namespace are untouched.
    pub async fn erase_namespace(&self) -> Result<usize> {
        let keys = self.list_keys().await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        debug!(count = keys.len(), "erased local lists");
        Ok(keys.len())
    }

    pub async fn add_record(&self, storage_key: &str, text: &str) -> Result<Record> {
        let text = validate_text(text)?;
        let mut list = self.require(storage_key).await?;
        let record = Record::new(text);
        list.records.push(record.clone());
        self.save(&mut list).await?;
        Ok(record)
    }

    pub async fn set_completed(&self, storage_key: &str, id: &Uuid, completed: bool) -> Result<()> {
        self.update_record(storage_key, id, |record| {
            record.completed = completed;
        })
        .await
    }

    pub async fn edit_record(&self, storage_key: &str, id: &Uuid, text: &str) -> Result<()> {
        let text = validate_text(text)?;
        self.update_record(storage_key, id, |record| {
            record.text = text;
        })
        .await
    }

    pub async fn remove_record(&self, storage_key: &str, id: &Uuid) -> Result<()> {
        let mut list = self.require(storage_key).await?;
        let before = list.records.len();
        list.records.retain(|record| &record.id != id);
        if list.records.len() == before {
            return Err(VaultError::NotFound(format!("record {}", id)));
        }
        self.save(&mut list).await
    }

    async fn update_record<F>(&self, storage_key: &str, id: &Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Record),
    {
        let mut list = self.require(storage_key).await?;
        let record = list
            .records
            .iter_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("record {}", id)))?;
        apply(record);
        record.updated_at = Utc::now();
        self.save(&mut list).await
    }

    /// Create an empty list with a key generated from its title.
    pub async fn create_list(&self, title: &str) -> Result<LocalList> {
        let title = title.trim();
        if title.is_empty() {
            return Err(VaultError::InvalidInput(
                "List title cannot be empty".to_string(),
            ));
        }

        let base = storage_key_for_title(title);
        let mut candidate = base.clone();
        for _ in 0..MAX_KEY_ATTEMPTS {
            if self.store.get(&candidate).await?.is_none() {
                let mut list = LocalList::new(title, candidate);
                self.save(&mut list).await?;
                return Ok(list);
            }
            candidate = with_random_suffix(&base);
        }
        Err(VaultError::Other(format!(
            "could not find a free storage key for {:?}",
            title
        )))
    }

    /// Create any missing default lists. Existing lists keep their content.
    ///
    /// Returns the keys that were created.
    pub async fn ensure_defaults(&self, defaults: &[DefaultList]) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for default in defaults {
            if self.store.get(&default.storage_key).await?.is_some() {
                continue;
            }
            let mut list = LocalList::new(default.title.clone(), default.storage_key.clone());
            self.save(&mut list).await?;
            created.push(default.storage_key.clone());
        }
        Ok(created)
    }
}

fn validate_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidInput(
            "Item text cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
