//! UI-facing notifications.
//!
//! One broadcast channel per notification kind. Sends are fire-and-forget:
//! having no listener is normal.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ErrorKind, VaultError};

const CHANNEL_CAPACITY: usize = 128;

/// Where a list change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsChanged {
    pub storage_key: String,
    pub origin: ChangeOrigin,
}

/// All session data has been wiped; views must reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutReset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    pub storage_key: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn from_error(storage_key: Option<&str>, err: &VaultError) -> Self {
        Self {
            storage_key: storage_key.map(str::to_string),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Typed notification channels shared by the coordinator, the auth machine
/// and the UI.
#[derive(Clone)]
pub struct EventBus {
    records_changed: broadcast::Sender<RecordsChanged>,
    logout_reset: broadcast::Sender<LogoutReset>,
    sync_error: broadcast::Sender<SyncError>,
}

impl EventBus {
    pub fn new() -> Self {
        let (records_changed, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (logout_reset, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (sync_error, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            records_changed,
            logout_reset,
            sync_error,
        }
    }

    pub fn records_changed(&self) -> broadcast::Receiver<RecordsChanged> {
        self.records_changed.subscribe()
    }

    pub fn logout_reset(&self) -> broadcast::Receiver<LogoutReset> {
        self.logout_reset.subscribe()
    }

    pub fn sync_errors(&self) -> broadcast::Receiver<SyncError> {
        self.sync_error.subscribe()
    }

    pub fn emit_records_changed(&self, storage_key: &str, origin: ChangeOrigin) {
        let _ = self.records_changed.send(RecordsChanged {
            storage_key: storage_key.to_string(),
            origin,
        });
    }

    pub fn emit_logout_reset(&self) {
        let _ = self.logout_reset.send(LogoutReset);
    }

    pub fn emit_sync_error(&self, storage_key: Option<&str>, err: &VaultError) {
        let _ = self.sync_error.send(SyncError::from_error(storage_key, err));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
