//! Live symmetric key held for a session.

use std::sync::Arc;

use aes_gcm::{Aes256Gcm, Key, KeyInit};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of the encryption key in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

const KEY_CHECK_INPUT: &[u8] = b"locklist-key-check-v1";

/// An imported AES-256-GCM key plus its raw bytes.
///
/// Cloning shares the same key; the raw bytes are zeroized when the last
/// clone is dropped.
#[derive(Clone)]
pub struct CryptoKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    cipher: Aes256Gcm,
    raw: Zeroizing<[u8; KEY_LENGTH]>,
}

impl CryptoKey {
    /// Import raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let raw = Zeroizing::new(bytes);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&raw[..]));
        Self {
            inner: Arc::new(KeyInner { cipher, raw }),
        }
    }

    /// Import key bytes of unchecked length (e.g. read back from a cache).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(VaultError::Validation(format!(
                "Key must be {} bytes (got {})",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut raw = [0u8; KEY_LENGTH];
        raw.copy_from_slice(bytes);
        Ok(Self::from_bytes(raw))
    }

    /// Generate a random key from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut raw = [0u8; KEY_LENGTH];
        getrandom::getrandom(&mut raw)
            .map_err(|e| VaultError::Crypto(format!("Failed to generate key bytes: {}", e)))?;
        Ok(Self::from_bytes(raw))
    }

    /// Raw key bytes.
    ///
    /// # Security
    ///
    /// Only the key cache should persist these.
    pub fn raw_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.inner.raw
    }

    pub(crate) fn cipher(&self) -> &Aes256Gcm {
        &self.inner.cipher
    }

    /// Keyed digest published in the account profile so a device can tell
    /// whether the key it holds is still the account's current key.
    pub fn check_value(&self) -> String {
        blake3::keyed_hash(self.raw_bytes(), KEY_CHECK_INPUT)
            .to_hex()
            .to_string()
    }

    /// Whether `check` was produced by [`check_value`](Self::check_value)
    /// for this key.
    pub fn matches_check(&self, check: &str) -> bool {
        match hex::decode(check.trim()) {
            Ok(bytes) => {
                let own = blake3::keyed_hash(self.raw_bytes(), KEY_CHECK_INPUT);
                own.as_bytes().as_slice().ct_eq(bytes.as_slice()).into()
            }
            Err(_) => false,
        }
    }

    /// Short non-reversible identifier for log lines.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.inner.raw[..]);
        hash.to_hex()[..12].to_string()
    }
}

impl PartialEq for CryptoKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw_bytes() == other.raw_bytes()
    }
}

impl Eq for CryptoKey {}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoKey")
            .field("fingerprint", &self.fingerprint())
            .field("raw", &"[REDACTED]")
            .finish()
    }
}
