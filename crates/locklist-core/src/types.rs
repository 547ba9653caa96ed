//! Core data types shared by the local store, the codec and the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::CryptoKey;
use crate::error::{Result, VaultError};

/// Prefix reserved for list documents in the local namespace.
pub const LIST_STORAGE_PREFIX: &str = "list-storage-";

/// Maximum length of a list slug (the part after the prefix).
const MAX_SLUG_BYTES: usize = 64;

/// Stable user identifier supplied by the identity provider. Not secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// A single to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier for this record
    pub id: Uuid,

    /// Item text
    pub text: String,

    /// Whether the item is done
    pub completed: bool,

    /// When this record was created
    pub created_at: DateTime<Utc>,

    /// Last edit of this record
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            text: text.into(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Plaintext form of a list, as held in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalList {
    pub title: String,
    pub storage_key: String,
    pub records: Vec<Record>,
    pub last_modified: DateTime<Utc>,
}

impl LocalList {
    pub fn new(title: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            storage_key: storage_key.into(),
            records: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    /// Content hash over title and records.
    ///
    /// The list's own `last_modified` is excluded so re-saving identical
    /// content never counts as a change.
    pub fn content_hash(&self) -> ContentHash {
        #[derive(Serialize)]
        struct Canonical<'a> {
            title: &'a str,
            records: &'a [Record],
        }
        let canonical = Canonical {
            title: &self.title,
            records: &self.records,
        };
        // Serializing plain structs of strings/bools/timestamps cannot fail.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        ContentHash(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn find_record(&self, id: &Uuid) -> Option<&Record> {
        self.records.iter().find(|record| &record.id == id)
    }
}

/// Hex blake3 digest of a list's plaintext content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A record sealed for transport: `ciphertext` is base64(nonce || sealed payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecord {
    pub id: Uuid,
    pub ciphertext: String,
}

/// One remote document per list.
///
/// `storage_key` is both the local key and the remote document id, and is
/// stored in the document itself so new lists need no hardcoded mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocument {
    pub title: String,
    pub storage_key: String,
    pub records: Vec<EncryptedRecord>,
    pub last_modified: DateTime<Utc>,
}

/// Per-user profile held by the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,

    /// Keyed digest of the current encryption key; absent on older profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_check: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RemoteProfile {
    /// Verification hash if the profile is complete.
    pub fn stored_hash(&self) -> Result<&str> {
        match self.verification_hash.as_deref() {
            Some(hash) if !hash.trim().is_empty() => Ok(hash),
            _ => Err(VaultError::IncompleteAccount(
                "profile has no verification hash".to_string(),
            )),
        }
    }

    /// False only when the profile names a key other than `key`.
    pub fn accepts_key(&self, key: &CryptoKey) -> bool {
        match self.key_check.as_deref() {
            Some(check) => key.matches_check(check),
            None => true,
        }
    }
}

/// A well-known list seeded for anonymous use and new accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultList {
    pub title: String,
    pub storage_key: String,
}

impl DefaultList {
    pub fn new(title: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            storage_key: storage_key.into(),
        }
    }
}

/// The built-in default list set.
pub fn default_lists() -> Vec<DefaultList> {
    vec![
        DefaultList::new("To Do", "list-storage-todo"),
        DefaultList::new("Shopping", "list-storage-shopping"),
        DefaultList::new("Ideas", "list-storage-ideas"),
    ]
}

/// Whether `key` belongs to the reserved list namespace.
pub fn is_list_key(key: &str) -> bool {
    key.strip_prefix(LIST_STORAGE_PREFIX)
        .map(|slug| !slug.is_empty())
        .unwrap_or(false)
}

/// Validate a storage key: prefix plus a non-empty slug of `[a-z0-9-]`.
pub fn validate_storage_key(key: &str) -> Result<()> {
    let slug = key.strip_prefix(LIST_STORAGE_PREFIX).ok_or_else(|| {
        VaultError::InvalidInput(format!(
            "Storage key must start with {}",
            LIST_STORAGE_PREFIX
        ))
    })?;
    if slug.is_empty() || slug.len() > MAX_SLUG_BYTES {
        return Err(VaultError::InvalidInput(format!(
            "Storage key slug must be 1-{} bytes",
            MAX_SLUG_BYTES
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(VaultError::InvalidInput(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Build a storage key from a list title.
///
/// Non-alphanumeric runs collapse into single dashes; a title with no usable
/// characters gets a random slug.
pub fn storage_key_for_title(title: &str) -> String {
    let mut slug = String::new();
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_end_matches('-').to_string();
    slug.truncate(MAX_SLUG_BYTES - 9);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        return format!("{}{}", LIST_STORAGE_PREFIX, short_suffix());
    }
    format!("{}{}", LIST_STORAGE_PREFIX, slug)
}

/// Append a short random suffix, used when a generated key already exists.
pub fn with_random_suffix(key: &str) -> String {
    format!("{}-{}", key, short_suffix())
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
