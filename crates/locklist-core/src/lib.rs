//! # Locklist Core
//!
//! Core library for Locklist - a local-first, end-to-end encrypted list keeper.
//!
//! Edits land in a store on the device first and are mirrored, sealed with a
//! passphrase-derived key, to a remote document store. The remote never sees
//! plaintext or the passphrase.
//!
//! ## Architecture
//!
//! - **crypto**: key derivation, the live key type, the record codec
//! - **storage**: durable key/value store (SQLite or memory) with a change feed
//! - **cache**: session key cache (memory + device)
//! - **local**: plaintext lists on the device
//! - **remote**: remote document store trait and implementations
//! - **identity**: identity provider trait
//! - **sync**: debounced push / snapshot apply coordinator
//! - **auth**: login, unlock and logout state machine
//! - **events**: typed notification channels for the UI

pub mod auth;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod events;
pub mod fs;
pub mod identity;
pub mod local;
pub mod remote;
pub mod single_flight;
pub mod storage;
pub mod sync;
pub mod types;

pub use auth::{AuthConfig, AuthState, AuthStateMachine, Session};
pub use cache::{KeyCache, KeyCacheWrite};
pub use error::{ErrorKind, Result, VaultError};
pub use events::{ChangeOrigin, EventBus};
pub use local::LocalStore;
pub use storage::{open_durable_store, DurableStore, SharedStore, StoreConfig};
pub use sync::{SyncConfig, SyncCoordinator, SyncStatus};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
