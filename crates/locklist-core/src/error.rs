//! Error types for locklist core operations.
//!
//! Primitives (crypto, storage, remote calls) raise `VaultError`. Before a
//! failure reaches the UI boundary it is reduced to an [`ErrorKind`] plus a
//! message, so raw primitive errors never leak past the coordinator or the
//! auth state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for locklist operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Core error type for locklist operations.
///
/// Variants carry strings rather than source errors so the type stays
/// `Clone`; single-flight callers share one result between many waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Entered passphrase does not match the stored verification hash.
    ///
    /// Deliberately says nothing about whether the account exists.
    #[error("Incorrect passphrase")]
    InvalidPassphrase,

    /// AEAD tag mismatch, truncated ciphertext or undecodable payload.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption failed (cipher could not be constructed or sealed).
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// The key-derivation primitive cannot be used with these parameters.
    #[error("Key derivation unavailable: {0}")]
    KeyDerivationUnavailable(String),

    /// Durable store could not be opened at all.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Durable store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote store unreachable or rejected the request.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote profile exists but lacks required fields.
    #[error("Account is incomplete: {0}")]
    IncompleteAccount(String),

    /// Identity provider failed to sign in or out.
    #[error("Authentication failed: {0}")]
    TransientAuthFailure(String),

    /// Operation is not valid in the current auth state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialized data did not have the expected shape.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic error (fallback)
    #[error("{0}")]
    Other(String),
}

/// The error taxonomy exposed at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPassphrase,
    DecryptionFailed,
    KeyDerivationUnavailable,
    StorageUnavailable,
    NetworkFailure,
    IncompleteAccount,
    TransientAuthFailure,
    Internal,
}

impl VaultError {
    /// Translate into the UI-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::InvalidPassphrase => ErrorKind::InvalidPassphrase,
            VaultError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            VaultError::KeyDerivationUnavailable(_) => ErrorKind::KeyDerivationUnavailable,
            VaultError::StorageUnavailable(_) | VaultError::Storage(_) => {
                ErrorKind::StorageUnavailable
            }
            VaultError::Network(_) => ErrorKind::NetworkFailure,
            VaultError::IncompleteAccount(_) => ErrorKind::IncompleteAccount,
            VaultError::TransientAuthFailure(_) => ErrorKind::TransientAuthFailure,
            VaultError::Crypto(_)
            | VaultError::InvalidState(_)
            | VaultError::NotFound(_)
            | VaultError::InvalidInput(_)
            | VaultError::Validation(_)
            | VaultError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the user can recover by retrying (re-prompt, re-sign-in, reconnect).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::KeyDerivationUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::InvalidPassphrase => "invalid passphrase",
            ErrorKind::DecryptionFailed => "decryption failed",
            ErrorKind::KeyDerivationUnavailable => "key derivation unavailable",
            ErrorKind::StorageUnavailable => "storage unavailable",
            ErrorKind::NetworkFailure => "network failure",
            ErrorKind::IncompleteAccount => "incomplete account",
            ErrorKind::TransientAuthFailure => "authentication failure",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(label)
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Validation(err.to_string())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Storage(format!("SQLite error: {}", err))
    }
}
