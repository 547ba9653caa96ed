//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! Derives 512 bits from (user id, passphrase). The first half proves the
//! passphrase (only its SHA-256 digest ever leaves the device); the second
//! half is the record encryption key. Neither half is used for the other's
//! purpose.

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use super::key::{CryptoKey, KEY_LENGTH};
use crate::error::{Result, VaultError};

/// Lowest accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Domain separation for the per-user salt.
const SALT_PREFIX: &[u8] = b"locklist-kdf-v1:";

/// Total derived material: verification half + crypto half.
const MATERIAL_LENGTH: usize = KEY_LENGTH * 2;

/// PBKDF2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    /// Create parameters, refusing iteration counts below [`MIN_ITERATIONS`].
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < MIN_ITERATIONS {
            return Err(VaultError::KeyDerivationUnavailable(format!(
                "PBKDF2 iterations must be at least {} (got {})",
                MIN_ITERATIONS, iterations
            )));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

/// 512 bits of passphrase-derived key material.
///
/// Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedMaterial {
    bytes: [u8; MATERIAL_LENGTH],
}

impl DerivedMaterial {
    /// The raw material.
    ///
    /// # Security
    ///
    /// Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; MATERIAL_LENGTH] {
        &self.bytes
    }

    fn verification_key(&self) -> &[u8] {
        &self.bytes[..KEY_LENGTH]
    }

    /// Hex SHA-256 digest of the verification half.
    pub fn verification_hash(&self) -> String {
        hex::encode(Sha256::digest(self.verification_key()))
    }

    /// Import the crypto half as a live AES-256-GCM key.
    pub fn crypto_key(&self) -> CryptoKey {
        let mut raw = [0u8; KEY_LENGTH];
        raw.copy_from_slice(&self.bytes[KEY_LENGTH..]);
        CryptoKey::from_bytes(raw)
    }
}

impl std::fmt::Debug for DerivedMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Deterministic (user id, passphrase) → key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    params: KdfParams,
}

impl KeyDeriver {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive key material. Pure and deterministic; no I/O.
    ///
    /// This is deliberately slow. Call it off the async executor
    /// (`tokio::task::spawn_blocking`).
    pub fn derive(&self, user_id: &str, passphrase: &SecretString) -> DerivedMaterial {
        let salt = salt_for(user_id);
        let mut bytes = [0u8; MATERIAL_LENGTH];
        pbkdf2_hmac::<Sha256>(
            passphrase.expose_secret().as_bytes(),
            &salt,
            self.params.iterations,
            &mut bytes,
        );
        DerivedMaterial { bytes }
    }

    /// Derive and return the hex verification hash.
    pub fn verification_hash(&self, user_id: &str, passphrase: &SecretString) -> String {
        self.derive(user_id, passphrase).verification_hash()
    }
}

fn salt_for(user_id: &str) -> Vec<u8> {
    let mut salt = Vec::with_capacity(SALT_PREFIX.len() + user_id.len());
    salt.extend_from_slice(SALT_PREFIX);
    salt.extend_from_slice(user_id.as_bytes());
    salt
}

/// Compare two hex verification hashes over their decoded bytes in
/// constant time. Malformed hex never matches.
pub fn verify_hash(expected: &str, actual: &str) -> bool {
    let (Ok(expected), Ok(actual)) = (hex::decode(expected.trim()), hex::decode(actual.trim()))
    else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    expected.as_slice().ct_eq(actual.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_derivation_deterministic() {
        let deriver = KeyDeriver::default();
        let first = deriver.derive("alice", &secret("correct horse"));
        let second = deriver.derive("alice", &secret("correct horse"));
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_salt_is_per_user() {
        let deriver = KeyDeriver::default();
        let alice = deriver.derive("alice", &secret("correct horse"));
        let bob = deriver.derive("bob", &secret("correct horse"));
        assert_ne!(alice.as_bytes(), bob.as_bytes());
    }

    #[test]
    fn test_halves_are_disjoint() {
        let material = KeyDeriver::default().derive("alice", &secret("correct horse"));
        let key = material.crypto_key();
        assert_eq!(&material.as_bytes()[KEY_LENGTH..], key.raw_bytes());
        assert_ne!(&material.as_bytes()[..KEY_LENGTH], key.raw_bytes());
        // The published hash is a digest of the verification half only.
        assert_ne!(
            material.verification_hash(),
            hex::encode(Sha256::digest(key.raw_bytes()))
        );
    }

    #[test]
    fn test_verification_hash_shape() {
        let hash = KeyDeriver::default().verification_hash("alice", &secret("correct horse"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_wrong_passphrase_changes_hash() {
        let deriver = KeyDeriver::default();
        let good = deriver.verification_hash("alice", &secret("correct horse"));
        let bad = deriver.verification_hash("alice", &secret("wrong horse"));
        assert!(!verify_hash(&good, &bad));
        assert!(verify_hash(&good, &good.to_uppercase()));
    }

    #[test]
    fn test_verify_hash_rejects_malformed_and_truncated() {
        let good = KeyDeriver::default().verification_hash("alice", &secret("correct horse"));
        assert!(verify_hash(&good, &format!(" {}\n", good)));
        assert!(!verify_hash(&good, &good[..62]));
        assert!(!verify_hash(&good, &format!("{}zz", &good[..62])));
        assert!(!verify_hash("", ""));
        assert!(!verify_hash(&good, ""));
    }

    #[test]
    fn test_low_iterations_rejected() {
        let err = KdfParams::new(1_000).unwrap_err();
        assert!(matches!(err, VaultError::KeyDerivationUnavailable(_)));
        assert_eq!(KdfParams::new(MIN_ITERATIONS).unwrap().iterations(), MIN_ITERATIONS);
    }

    #[test]
    fn test_debug_redacts() {
        let material = KeyDeriver::default().derive("alice", &secret("correct horse"));
        let debug_output = format!("{:?}", material);
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains(&hex::encode(&material.as_bytes()[..4])));
    }
}
