//! Application context for the Locklist CLI.
//!
//! Wires the config file to the engine: one durable store, a key cache on
//! the configured backend, the directory remote and the auth state machine.

use std::path::PathBuf;
use std::sync::Arc;

use locklist_core::crypto::KdfParams;
use locklist_core::identity::{IdentityProvider, LocalIdentityProvider};
use locklist_core::remote::DirRemote;
use locklist_core::storage::MemoryStore;
use locklist_core::types::Identity;
use locklist_core::{
    open_durable_store, AuthConfig, AuthState, AuthStateMachine, EventBus, KeyCache, LocalStore,
    Session, SharedStore,
};

use crate::cli::Cli;
use crate::config::{load_config, KeyCacheBackend, LocklistConfig};
use crate::errors::CliError;
use crate::security::KeychainStore;

use super::passphrase::complete_login;
use super::session::SessionFile;

/// Everything a command needs, built once per invocation.
pub struct AppContext<'a> {
    cli: &'a Cli,
    auth: AuthStateMachine,
    identities: LocalIdentityProvider,
    session_file: SessionFile,
}

impl<'a> AppContext<'a> {
    /// Load the config and open the stores.
    ///
    /// The identity saved by the last `login` is restored; without one the
    /// default lists are seeded for anonymous use.
    pub async fn open(cli: &'a Cli) -> anyhow::Result<AppContext<'a>> {
        let config = load_config()?;
        let store = open_durable_store(&config.store_config()?);
        let cache_store: SharedStore = match config.security.key_cache {
            KeyCacheBackend::Device => store.clone(),
            KeyCacheBackend::Keychain => Arc::new(KeychainStore::new()),
            KeyCacheBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let remote = Arc::new(DirRemote::new(config.remote_path()?, config.poll_interval()));

        let auth = AuthStateMachine::new(
            LocalStore::new(store),
            Arc::new(KeyCache::new(cache_store)),
            remote,
            EventBus::new(),
            AuthConfig {
                kdf: KdfParams::default(),
                sync: config.sync_config(),
                default_lists: config.default_lists(),
            },
        );

        let session_file = SessionFile::new(session_path(&config)?);
        let identities = match session_file.read()? {
            Some(identity) => LocalIdentityProvider::signed_in(identity),
            None => {
                auth.initialize().await?;
                LocalIdentityProvider::new()
            }
        };

        Ok(Self {
            cli,
            auth,
            identities,
            session_file,
        })
    }

    pub fn cli(&self) -> &Cli {
        self.cli
    }

    pub fn quiet(&self) -> bool {
        self.cli.quiet
    }

    pub fn auth(&self) -> &AuthStateMachine {
        &self.auth
    }

    pub fn local(&self) -> &LocalStore {
        self.auth.local()
    }

    /// The saved identity, if any, without unlocking.
    pub fn saved_identity(&self) -> Option<Identity> {
        self.identities.current()
    }

    /// Bring the saved identity back to `Ready`, prompting if the key is
    /// not cached. Returns `None` when nobody is signed in.
    pub async fn resume(&self) -> anyhow::Result<Option<Session>> {
        if self.identities.current().is_none() {
            return Ok(None);
        }
        let state = self.auth.handle_auth_event(self.identities.current()).await?;
        complete_login(self, state).await?;
        Ok(self.auth.session().await)
    }

    /// Like [`resume`](Self::resume), but a signed-in session is required.
    pub async fn require_session(&self) -> anyhow::Result<Session> {
        match self.resume().await? {
            Some(session) => Ok(session),
            None => Err(CliError::not_found(
                "Not signed in.",
                "Hint: run `locklist login <uid>` first.",
            )
            .into()),
        }
    }

    /// Sign in as `uid` and drive the machine to `Ready`.
    pub async fn login(&self, uid: &str) -> anyhow::Result<AuthState> {
        let identity = self.identities.sign_in(uid).await?;
        let state = self.auth.handle_auth_event(Some(identity.clone())).await?;
        complete_login(self, state).await?;
        self.session_file.write(&identity)?;
        Ok(self.auth.state())
    }

    /// Sign out, erasing this device's lists.
    ///
    /// With a cached key the session is resumed first so unsynced edits
    /// are flushed; without one nothing is prompted for.
    pub async fn logout(&self) -> anyhow::Result<()> {
        if let Some(identity) = self.identities.current() {
            if let Err(err) = self.auth.handle_auth_event(Some(identity)).await {
                tracing::debug!(error = %err, "could not resume session before logout");
            }
        }
        self.identities.sign_out().await?;
        let result = self.auth.logout().await;
        self.session_file.clear()?;
        result?;
        Ok(())
    }

    /// Push outstanding edits and stop syncing.
    pub async fn close(&self) -> anyhow::Result<()> {
        if let Some(session) = self.auth.session().await {
            let coordinator = session.coordinator();
            coordinator.flush().await?;
            coordinator.shutdown().await;
            let pending = coordinator.pending();
            if !pending.is_empty() && !self.quiet() {
                eprintln!(
                    "Warning: {} list{} not synced yet; they will be pushed on the next run.",
                    pending.len(),
                    if pending.len() == 1 { "" } else { "s" }
                );
            }
        }
        Ok(())
    }
}

fn session_path(config: &LocklistConfig) -> anyhow::Result<PathBuf> {
    let store = config.store_path()?;
    let dir = store
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join(crate::constants::SESSION_FILE))
}
