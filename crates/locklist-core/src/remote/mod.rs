//! Remote document store collaborator.
//!
//! The remote holds, per user, one profile and one encrypted document per
//! list. It only ever sees ciphertext and the verification hash.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryRemote`]: in-process, can be switched offline
//! - [`DirRemote`]: JSON files under a directory shared between devices

pub mod dir;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::types::{ListDocument, RemoteProfile};

pub use dir::DirRemote;
pub use memory::MemoryRemote;

/// Per-user document store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the user's profile, `None` if the account has none yet.
    async fn get_profile(&self, uid: &str) -> Result<Option<RemoteProfile>>;

    /// Create or replace the user's profile.
    async fn put_profile(&self, uid: &str, profile: &RemoteProfile) -> Result<()>;

    /// Fetch one document.
    async fn get(&self, uid: &str, storage_key: &str) -> Result<Option<ListDocument>>;

    /// Upsert a document, replacing the stored fields.
    async fn put(&self, uid: &str, document: &ListDocument) -> Result<()>;

    /// Delete a document. Deleting an absent document is not an error.
    async fn delete(&self, uid: &str, storage_key: &str) -> Result<()>;

    /// Every document of the user.
    async fn list_all(&self, uid: &str) -> Result<Vec<ListDocument>>;

    /// Live snapshots of every document; the first arrives immediately.
    async fn subscribe(&self, uid: &str) -> Result<RemoteSubscription>;
}

/// Shared handle to a remote store.
pub type SharedRemote = Arc<dyn RemoteStore>;

/// A stream of full snapshots. Dropping it ends the subscription.
pub struct RemoteSubscription {
    snapshots: mpsc::UnboundedReceiver<Vec<ListDocument>>,
    worker: Option<JoinHandle<()>>,
}

impl RemoteSubscription {
    pub(crate) fn new(snapshots: mpsc::UnboundedReceiver<Vec<ListDocument>>) -> Self {
        Self {
            snapshots,
            worker: None,
        }
    }

    pub(crate) fn with_worker(
        snapshots: mpsc::UnboundedReceiver<Vec<ListDocument>>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            snapshots,
            worker: Some(worker),
        }
    }

    /// Next snapshot, or `None` once the remote ends the subscription.
    pub async fn next(&mut self) -> Option<Vec<ListDocument>> {
        self.snapshots.recv().await
    }

    /// End the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.snapshots.close();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
