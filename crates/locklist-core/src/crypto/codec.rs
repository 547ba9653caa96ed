//! Record sealing with AES-256-GCM.
//!
//! Wire format of `EncryptedRecord::ciphertext`:
//! `base64(nonce[12] || ciphertext || tag[16])`.
//!
//! The codec is stateless and key-agnostic: it never derives keys.

use aes_gcm::aead::Aead;
use aes_gcm::Nonce;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use uuid::Uuid;

use super::key::CryptoKey;
use crate::error::{Result, VaultError};
use crate::types::{EncryptedRecord, ListDocument, LocalList, Record};

/// AES-GCM nonce length (96 bits).
const NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length.
const TAG_LENGTH: usize = 16;

/// Encrypt one record under `key` with a fresh random nonce.
pub fn encrypt(record: &Record, key: &CryptoKey) -> Result<EncryptedRecord> {
    let plaintext = serde_json::to_vec(record)?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| VaultError::Crypto(format!("Failed to generate nonce: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = key
        .cipher()
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| VaultError::Crypto("Encryption failed".to_string()))?;

    let mut payload = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&sealed);

    Ok(EncryptedRecord {
        id: record.id,
        ciphertext: STANDARD.encode(payload),
    })
}

/// Decrypt one record.
///
/// # Errors
///
/// Returns `VaultError::DecryptionFailed` if:
/// - The key is wrong (tag mismatch)
/// - The payload was corrupted or tampered with
/// - The payload is not valid base64 or too short
/// - The opened plaintext is not a record
pub fn decrypt(encrypted: &EncryptedRecord, key: &CryptoKey) -> Result<Record> {
    let payload = STANDARD.decode(encrypted.ciphertext.as_bytes()).map_err(|e| {
        VaultError::DecryptionFailed(format!("record {}: invalid base64: {}", encrypted.id, e))
    })?;

    if payload.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(VaultError::DecryptionFailed(format!(
            "record {}: payload too short",
            encrypted.id
        )));
    }

    let (nonce_bytes, sealed) = payload.split_at(NONCE_LENGTH);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| {
            VaultError::DecryptionFailed(format!(
                "record {}: authentication failed",
                encrypted.id
            ))
        })?;

    let record: Record = serde_json::from_slice(&plaintext).map_err(|e| {
        VaultError::DecryptionFailed(format!("record {}: invalid payload: {}", encrypted.id, e))
    })?;

    if record.id != encrypted.id {
        return Err(VaultError::DecryptionFailed(format!(
            "record {}: sealed id does not match envelope",
            encrypted.id
        )));
    }

    Ok(record)
}

/// Seal every record of a list into a remote document.
pub fn encrypt_list(list: &LocalList, key: &CryptoKey) -> Result<ListDocument> {
    let records = list
        .records
        .iter()
        .map(|record| encrypt(record, key))
        .collect::<Result<Vec<_>>>()?;

    Ok(ListDocument {
        title: list.title.clone(),
        storage_key: list.storage_key.clone(),
        records,
        last_modified: list.last_modified,
    })
}

/// Result of opening a whole document.
#[derive(Debug)]
pub struct DecodedDocument {
    /// The records that opened successfully.
    pub list: LocalList,

    /// Records that failed, with the reason.
    pub failures: Vec<(Uuid, VaultError)>,
}

/// Open every record of a document. A failing record is reported in
/// `failures` and does not stop the others.
pub fn decrypt_document(document: &ListDocument, key: &CryptoKey) -> DecodedDocument {
    let mut records = Vec::with_capacity(document.records.len());
    let mut failures = Vec::new();

    for encrypted in &document.records {
        match decrypt(encrypted, key) {
            Ok(record) => records.push(record),
            Err(err) => failures.push((encrypted.id, err)),
        }
    }

    DecodedDocument {
        list: LocalList {
            title: document.title.clone(),
            storage_key: document.storage_key.clone(),
            records,
            last_modified: document.last_modified,
        },
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        Record::new("buy oat milk")
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = CryptoKey::generate().unwrap();
        let record = sample_record();

        let encrypted = encrypt(&record, &key).unwrap();
        let decrypted = decrypt(&encrypted, &key).unwrap();

        assert_eq!(decrypted, record);
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let key = CryptoKey::generate().unwrap();
        let encrypted = encrypt(&sample_record(), &key).unwrap();
        let raw = STANDARD.decode(&encrypted.ciphertext).unwrap();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("oat milk"));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = CryptoKey::generate().unwrap();
        let record = sample_record();

        let first = STANDARD
            .decode(encrypt(&record, &key).unwrap().ciphertext)
            .unwrap();
        let second = STANDARD
            .decode(encrypt(&record, &key).unwrap().ciphertext)
            .unwrap();

        assert_ne!(first[..NONCE_LENGTH], second[..NONCE_LENGTH]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let key1 = CryptoKey::generate().unwrap();
        let key2 = CryptoKey::generate().unwrap();

        let encrypted = encrypt(&sample_record(), &key1).unwrap();
        let result = decrypt(&encrypted, &key2);

        assert!(matches!(result, Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_corrupted_data_fails_decryption() {
        let key = CryptoKey::generate().unwrap();
        let mut encrypted = encrypt(&sample_record(), &key).unwrap();

        let mut raw = STANDARD.decode(&encrypted.ciphertext).unwrap();
        let len = raw.len();
        raw[len / 2] ^= 0xFF;
        encrypted.ciphertext = STANDARD.encode(raw);

        assert!(matches!(
            decrypt(&encrypted, &key),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_truncated_and_garbage_payloads_fail() {
        let key = CryptoKey::generate().unwrap();
        let id = Uuid::new_v4();

        let short = EncryptedRecord {
            id,
            ciphertext: STANDARD.encode([0u8; 8]),
        };
        assert!(matches!(
            decrypt(&short, &key),
            Err(VaultError::DecryptionFailed(_))
        ));

        let garbage = EncryptedRecord {
            id,
            ciphertext: "not base64 at all!".to_string(),
        };
        assert!(matches!(
            decrypt(&garbage, &key),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_swapped_envelope_id_rejected() {
        let key = CryptoKey::generate().unwrap();
        let mut encrypted = encrypt(&sample_record(), &key).unwrap();
        encrypted.id = Uuid::new_v4();
        assert!(matches!(
            decrypt(&encrypted, &key),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_decrypt_document_reports_bad_records_and_keeps_good_ones() {
        let key = CryptoKey::generate().unwrap();
        let other = CryptoKey::generate().unwrap();

        let mut list = LocalList::new("To Do", "list-storage-todo");
        list.records.push(Record::new("one"));
        list.records.push(Record::new("two"));
        let mut document = encrypt_list(&list, &key).unwrap();

        let stray = Record::new("sealed elsewhere");
        document.records.push(encrypt(&stray, &other).unwrap());

        let decoded = decrypt_document(&document, &key);
        assert_eq!(decoded.list.records, list.records);
        assert_eq!(decoded.failures.len(), 1);
        assert_eq!(decoded.failures[0].0, stray.id);
        assert_eq!(decoded.list.last_modified, list.last_modified);
    }
}
