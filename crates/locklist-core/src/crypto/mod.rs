//! Cryptographic operations for locklist.
//!
//! - **PBKDF2-HMAC-SHA256**: stretches (user id, passphrase) into 512 bits of
//!   key material, split into a verification half and an encryption half
//! - **AES-256-GCM**: seals each record with a fresh 96-bit nonce
//!
//! ## Threat Model
//!
//! We defend against:
//! - A remote store operator reading list contents
//! - An observer of the verification hash recovering the encryption key
//! - Cross-user precomputation (the salt is derived from the user id)
//!
//! We do NOT defend against:
//! - Compromised OS / keylogger
//! - Access to an unlocked session or the device key cache
//! - Lost passphrases (nothing can be recovered without it)

pub mod codec;
pub mod kdf;
pub mod key;
pub mod passphrase;

pub use codec::{decrypt, decrypt_document, encrypt, encrypt_list, DecodedDocument};
pub use kdf::{verify_hash, DerivedMaterial, KdfParams, KeyDeriver, MIN_ITERATIONS};
pub use key::CryptoKey;
pub use passphrase::validate_passphrase;
