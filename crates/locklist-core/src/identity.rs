//! Identity provider collaborator.
//!
//! Supplies the stable user id and reports sign-in / sign-out. It never sees
//! the passphrase.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, VaultError};
use crate::types::Identity;

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Auth-state feed: `Some` when signed in, `None` when signed out.
    fn watch(&self) -> watch::Receiver<Option<Identity>>;

    /// The identity currently signed in.
    fn current(&self) -> Option<Identity>;

    async fn sign_in(&self, uid: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;
}

/// Identity provider for a single device: whoever names a uid is that user.
pub struct LocalIdentityProvider {
    state: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Start already signed in as `identity`.
    pub fn signed_in(identity: Identity) -> Self {
        let (state, _) = watch::channel(Some(identity));
        Self { state }
    }
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }

    fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    async fn sign_in(&self, uid: &str) -> Result<Identity> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(VaultError::TransientAuthFailure(
                "user id cannot be blank".to_string(),
            ));
        }
        let identity = Identity::new(uid);
        info!(uid, "signed in");
        self.state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.state.send_replace(None).is_some() {
            info!("signed out");
        }
        Ok(())
    }
}
