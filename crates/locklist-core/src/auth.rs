//! Login / unlock / logout lifecycle.
//!
//! ```text
//! Anonymous ──login──▶ Authenticating ──▶ NeedsPassphraseCreate ──▶ Generating ──┐
//!     ▲                     │          └─▶ NeedsPassphraseUnlock ──▶ Unlocking ───┤
//!     │                     └──── cached key ─────────────────────────────────────┤
//!     └──────────────────────────── logout ◀──────────────────────────── Ready ◀─┘
//! ```
//!
//! The machine owns the active [`Session`]. All transitions go through one
//! async mutex; key derivation goes through a single-flight guard so
//! concurrent requests for the same user and passphrase run the KDF once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{KeyCache, KeyCacheWrite};
use crate::crypto::{
    decrypt_document, encrypt_list, validate_passphrase, verify_hash, CryptoKey, DerivedMaterial,
    KdfParams, KeyDeriver,
};
use crate::error::{Result, VaultError};
use crate::events::EventBus;
use crate::local::LocalStore;
use crate::remote::SharedRemote;
use crate::single_flight::SingleFlight;
use crate::sync::{clear_sync_markers, SyncConfig, SyncCoordinator};
use crate::types::{default_lists, DefaultList, Identity, ListDocument, RemoteProfile};

/// Longest logout waits for the last push of unsynced edits.
pub const LOGOUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Anonymous,
    Authenticating,
    NeedsPassphraseCreate,
    NeedsPassphraseUnlock,
    Unlocking,
    Generating,
    Ready,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AuthState::Anonymous => "anonymous",
            AuthState::Authenticating => "authenticating",
            AuthState::NeedsPassphraseCreate => "needs passphrase (new account)",
            AuthState::NeedsPassphraseUnlock => "needs passphrase (unlock)",
            AuthState::Unlocking => "unlocking",
            AuthState::Generating => "generating key",
            AuthState::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// A signed-in, unlocked user.
#[derive(Clone)]
pub struct Session {
    identity: Identity,
    key: CryptoKey,
    coordinator: Arc<SyncCoordinator>,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn key(&self) -> &CryptoKey {
        &self.key
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("key", &self.key)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Parameters for new accounts; existing accounts use the iteration
    /// count stored in their profile.
    pub kdf: KdfParams,
    pub sync: SyncConfig,
    pub default_lists: Vec<DefaultList>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            sync: SyncConfig::default(),
            default_lists: default_lists(),
        }
    }
}

struct Machine {
    state: AuthState,
    identity: Option<Identity>,
    session: Option<Session>,
}

pub struct AuthStateMachine {
    local: LocalStore,
    cache: Arc<KeyCache>,
    remote: SharedRemote,
    events: EventBus,
    config: AuthConfig,
    machine: Mutex<Machine>,
    state_feed: watch::Sender<AuthState>,
    derivations: SingleFlight<DerivedMaterial>,
    kdf_runs: Arc<AtomicUsize>,
}

impl AuthStateMachine {
    pub fn new(
        local: LocalStore,
        cache: Arc<KeyCache>,
        remote: SharedRemote,
        events: EventBus,
        config: AuthConfig,
    ) -> Self {
        let (state_feed, _) = watch::channel(AuthState::Anonymous);
        Self {
            local,
            cache,
            remote,
            events,
            config,
            machine: Mutex::new(Machine {
                state: AuthState::Anonymous,
                identity: None,
                session: None,
            }),
            state_feed,
            derivations: SingleFlight::new(),
            kdf_runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed the default lists for anonymous use.
    ///
    /// Logout leaves the list namespace empty; call this again once the UI
    /// has handled the reset.
    pub async fn initialize(&self) -> Result<()> {
        self.local.ensure_defaults(&self.config.default_lists).await?;
        Ok(())
    }

    pub fn state(&self) -> AuthState {
        *self.state_feed.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state_feed.subscribe()
    }

    /// The active session, if unlocked.
    pub async fn session(&self) -> Option<Session> {
        self.machine.lock().await.session.clone()
    }

    /// The signed-in identity, unlocked or not.
    pub async fn identity(&self) -> Option<Identity> {
        self.machine.lock().await.identity.clone()
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// How many key derivations actually ran; joined requests are not counted.
    pub fn kdf_runs(&self) -> usize {
        self.kdf_runs.load(Ordering::SeqCst)
    }

    fn transition(&self, machine: &mut Machine, state: AuthState) {
        if machine.state != state {
            info!(from = %machine.state, to = %state, "auth state");
        }
        machine.state = state;
        self.state_feed.send_replace(state);
    }

    /// The identity provider reported a sign-in.
    pub async fn login(&self, identity: Identity) -> Result<AuthState> {
        let mut machine = self.machine.lock().await;

        if machine.identity.as_ref() == Some(&identity) && machine.state != AuthState::Anonymous {
            return Ok(machine.state);
        }
        if machine.state != AuthState::Anonymous {
            self.logout_locked(&mut machine).await?;
        }

        machine.identity = Some(identity.clone());
        self.transition(&mut machine, AuthState::Authenticating);

        let cached = match self.cache.get(&identity.uid).await {
            Ok(cached) => cached,
            Err(err) => {
                warn!(uid = %identity.uid, error = %err, "key cache unreadable");
                None
            }
        };
        if let Some(key) = cached {
            if !self.cached_key_is_current(&identity, &key).await {
                self.transition(&mut machine, AuthState::NeedsPassphraseUnlock);
                return Ok(AuthState::NeedsPassphraseUnlock);
            }
            info!(uid = %identity.uid, "using cached key");
            if let Err(err) = self.start_session(&mut machine, identity, key).await {
                machine.identity = None;
                self.transition(&mut machine, AuthState::Anonymous);
                return Err(err);
            }
            return Ok(machine.state);
        }

        let profile = match self.remote.get_profile(&identity.uid).await {
            Ok(profile) => profile,
            Err(err) => {
                machine.identity = None;
                self.transition(&mut machine, AuthState::Anonymous);
                return Err(VaultError::TransientAuthFailure(format!(
                    "could not load account: {}",
                    err
                )));
            }
        };

        let next = match profile {
            None => AuthState::NeedsPassphraseCreate,
            Some(profile) => match profile.stored_hash() {
                Ok(_) => AuthState::NeedsPassphraseUnlock,
                Err(err) => {
                    warn!(uid = %identity.uid, "account profile is incomplete");
                    self.events.emit_sync_error(None, &err);
                    AuthState::NeedsPassphraseCreate
                }
            },
        };
        self.transition(&mut machine, next);
        Ok(next)
    }

    /// Check a cached key against the account profile, evicting it if the
    /// profile names another key. An unreachable remote keeps the key.
    async fn cached_key_is_current(&self, identity: &Identity, key: &CryptoKey) -> bool {
        match self.remote.get_profile(&identity.uid).await {
            Ok(Some(profile)) if !profile.accepts_key(key) => {
                info!(uid = %identity.uid, "cached key is out of date; passphrase required");
                if let Err(err) = self.cache.clear(&identity.uid).await {
                    warn!(uid = %identity.uid, error = %err, "failed to evict cached key");
                }
                false
            }
            Ok(_) => true,
            Err(err) => {
                debug!(uid = %identity.uid, error = %err, "profile unavailable; trusting cached key");
                true
            }
        }
    }

    /// Choose the passphrase for a new account.
    pub async fn create_passphrase(&self, passphrase: &SecretString) -> Result<()> {
        validate_passphrase(passphrase.expose_secret())?;

        let mut machine = self.machine.lock().await;
        let identity = self.expect_state(&machine, AuthState::NeedsPassphraseCreate)?;
        self.transition(&mut machine, AuthState::Generating);

        match self.create_account(&mut machine, identity, passphrase).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if machine.state == AuthState::Generating {
                    self.transition(&mut machine, AuthState::NeedsPassphraseCreate);
                }
                Err(err)
            }
        }
    }

    async fn create_account(
        &self,
        machine: &mut Machine,
        identity: Identity,
        passphrase: &SecretString,
    ) -> Result<()> {
        let params = self.config.kdf;
        let material = self.derive(&identity.uid, passphrase, params).await?;

        let key = material.crypto_key();
        let profile = RemoteProfile {
            verification_hash: Some(material.verification_hash()),
            kdf_iterations: Some(params.iterations()),
            key_check: Some(key.check_value()),
            created_at: Some(Utc::now()),
        };
        self.remote.put_profile(&identity.uid, &profile).await?;
        info!(uid = %identity.uid, "account created");

        self.cache_key(&identity.uid, &key).await;

        // Lists already on the device (anonymous edits included) are pushed
        // by the session's initial pull.
        self.local
            .ensure_defaults(&self.config.default_lists)
            .await?;
        self.start_session(machine, identity, key).await
    }

    /// Unlock an existing account.
    ///
    /// A wrong passphrase leaves the state and the device untouched.
    pub async fn unlock(&self, passphrase: &SecretString) -> Result<()> {
        let mut machine = self.machine.lock().await;
        let identity = self.expect_state(&machine, AuthState::NeedsPassphraseUnlock)?;
        self.transition(&mut machine, AuthState::Unlocking);

        match self.unlock_account(&mut machine, identity, passphrase).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if machine.state == AuthState::Unlocking {
                    let fallback = match err {
                        VaultError::IncompleteAccount(_) => AuthState::NeedsPassphraseCreate,
                        _ => AuthState::NeedsPassphraseUnlock,
                    };
                    self.transition(&mut machine, fallback);
                }
                Err(err)
            }
        }
    }

    async fn unlock_account(
        &self,
        machine: &mut Machine,
        identity: Identity,
        passphrase: &SecretString,
    ) -> Result<()> {
        let (material, mut profile) = self.verify(&identity, passphrase).await?;
        let key = material.crypto_key();
        if profile.key_check.is_none() {
            profile.key_check = Some(key.check_value());
            if let Err(err) = self.remote.put_profile(&identity.uid, &profile).await {
                warn!(uid = %identity.uid, error = %err, "could not record key check on profile");
            }
        }
        self.cache_key(&identity.uid, &key).await;
        info!(uid = %identity.uid, "unlocked");
        self.start_session(machine, identity, key).await
    }

    /// Derive from `passphrase` and check it against the stored profile.
    async fn verify(
        &self,
        identity: &Identity,
        passphrase: &SecretString,
    ) -> Result<(DerivedMaterial, RemoteProfile)> {
        let profile = self
            .remote
            .get_profile(&identity.uid)
            .await?
            .ok_or_else(|| VaultError::IncompleteAccount("account has no profile".to_string()))?;
        let expected = profile.stored_hash()?.to_string();
        let params = match profile.kdf_iterations {
            Some(iterations) => KdfParams::new(iterations)?,
            None => self.config.kdf,
        };

        let material = self.derive(&identity.uid, passphrase, params).await?;
        if !verify_hash(&expected, &material.verification_hash()) {
            return Err(VaultError::InvalidPassphrase);
        }
        Ok((material, profile))
    }

    /// Sign out: stop syncing, forget keys, wipe the device's lists.
    pub async fn logout(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        self.logout_locked(&mut machine).await
    }

    async fn logout_locked(&self, machine: &mut Machine) -> Result<()> {
        let session = machine.session.take();
        if let Some(session) = &session {
            session.coordinator.shutdown().await;
        }

        let mut first_error = None;
        if let Err(err) = self.cache.clear_all().await {
            warn!(error = %err, "failed to clear key cache");
            first_error.get_or_insert(err);
        }

        if let Some(session) = &session {
            match tokio::time::timeout(LOGOUT_FLUSH_TIMEOUT, session.coordinator.final_flush())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "could not push unsynced edits before logout"),
                Err(_) => warn!("gave up pushing unsynced edits before logout"),
            }
        }

        if let Err(err) = self.local.erase_namespace().await {
            warn!(error = %err, "failed to erase local lists");
            first_error.get_or_insert(err);
        }
        if let Err(err) = clear_sync_markers(self.local.durable()).await {
            warn!(error = %err, "failed to clear sync markers");
            first_error.get_or_insert(err);
        }
        self.events.emit_logout_reset();

        machine.identity = None;
        self.transition(machine, AuthState::Anonymous);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-encrypt every document under a new passphrase.
    ///
    /// Nothing changes if `old` is wrong or any remote record cannot be
    /// opened with the current key.
    pub async fn change_passphrase(&self, old: &SecretString, new: &SecretString) -> Result<()> {
        validate_passphrase(new.expose_secret())?;

        let mut machine = self.machine.lock().await;
        let session = match (machine.state, machine.session.clone()) {
            (AuthState::Ready, Some(session)) => session,
            (state, _) => {
                return Err(VaultError::InvalidState(format!(
                    "cannot change passphrase while {}",
                    state
                )))
            }
        };
        let identity = session.identity.clone();

        let (old_material, mut profile) = self.verify(&identity, old).await?;
        if old_material.crypto_key() != session.key {
            return Err(VaultError::InvalidState(
                "session key does not match the account".to_string(),
            ));
        }

        session.coordinator.flush().await?;
        session.coordinator.shutdown().await;
        machine.session = None;
        self.transition(&mut machine, AuthState::Generating);

        let outcome = self
            .rotate(&identity, &session.key, new, &mut profile)
            .await;
        let key = match outcome {
            Ok(new_key) => new_key,
            Err(err) => {
                warn!(uid = %identity.uid, error = %err, "passphrase change failed");
                self.start_session(&mut machine, identity, session.key.clone())
                    .await?;
                return Err(err);
            }
        };

        self.cache_key(&identity.uid, &key).await;
        info!(uid = %identity.uid, "passphrase changed");
        self.start_session(&mut machine, identity, key).await
    }

    async fn rotate(
        &self,
        identity: &Identity,
        old_key: &CryptoKey,
        new: &SecretString,
        profile: &mut RemoteProfile,
    ) -> Result<CryptoKey> {
        let originals = self.remote.list_all(&identity.uid).await?;
        let mut reencrypted = Vec::with_capacity(originals.len());
        for document in &originals {
            let decoded = decrypt_document(document, old_key);
            if let Some((_, err)) = decoded.failures.into_iter().next() {
                return Err(err);
            }
            reencrypted.push(decoded.list);
        }

        let params = self.config.kdf;
        let material = self.derive(&identity.uid, new, params).await?;
        let new_key = material.crypto_key();

        // New profile before any document.
        let previous = profile.clone();
        profile.verification_hash = Some(material.verification_hash());
        profile.kdf_iterations = Some(params.iterations());
        profile.key_check = Some(new_key.check_value());
        if let Err(err) = self.remote.put_profile(&identity.uid, profile).await {
            *profile = previous;
            return Err(err);
        }

        let mut written: Vec<&ListDocument> = Vec::new();
        for (list, original) in reencrypted.iter().zip(&originals) {
            let outcome = match encrypt_list(list, &new_key) {
                Ok(document) => self.remote.put(&identity.uid, &document).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                self.restore(&identity.uid, &previous, &written).await;
                *profile = previous;
                return Err(err);
            }
            written.push(original);
        }
        Ok(new_key)
    }

    async fn restore(&self, uid: &str, profile: &RemoteProfile, originals: &[&ListDocument]) {
        if let Err(err) = self.remote.put_profile(uid, profile).await {
            warn!(uid, error = %err, "rollback of profile failed");
        }
        for document in originals {
            if let Err(err) = self.remote.put(uid, document).await {
                warn!(uid, storage_key = %document.storage_key, error = %err, "rollback write failed");
            }
        }
    }

    /// Feed one identity-provider notification into the machine.
    pub async fn handle_auth_event(&self, identity: Option<Identity>) -> Result<AuthState> {
        match identity {
            Some(identity) => self.login(identity).await,
            None => {
                if self.state() != AuthState::Anonymous {
                    self.logout().await?;
                }
                Ok(AuthState::Anonymous)
            }
        }
    }

    /// Follow the identity provider until it goes away.
    pub async fn run(&self, mut identities: watch::Receiver<Option<Identity>>) {
        loop {
            let current = identities.borrow_and_update().clone();
            if let Err(err) = self.handle_auth_event(current).await {
                warn!(error = %err, "auth transition failed");
            }
            if identities.changed().await.is_err() {
                break;
            }
        }
    }

    /// Derive key material off the async executor. Concurrent requests for
    /// the same user, passphrase and parameters share one derivation.
    pub async fn derive(
        &self,
        uid: &str,
        passphrase: &SecretString,
        params: KdfParams,
    ) -> Result<DerivedMaterial> {
        let flight_key = {
            let mut hasher = blake3::Hasher::new();
            hasher.update(uid.as_bytes());
            hasher.update(&[0]);
            hasher.update(passphrase.expose_secret().as_bytes());
            hasher.update(&params.iterations().to_le_bytes());
            hasher.finalize().to_hex().to_string()
        };

        let uid = uid.to_string();
        let passphrase = SecretString::from(passphrase.expose_secret().to_string());
        let runs = Arc::clone(&self.kdf_runs);
        self.derivations
            .run(&flight_key, move || async move {
                tokio::task::spawn_blocking(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    KeyDeriver::new(params).derive(&uid, &passphrase)
                })
                .await
                .map_err(|e| {
                    VaultError::KeyDerivationUnavailable(format!("derivation task failed: {}", e))
                })
            })
            .await
    }

    async fn cache_key(&self, uid: &str, key: &CryptoKey) {
        match self.cache.set(uid, key).await {
            Ok(KeyCacheWrite::Durable) => {}
            Ok(KeyCacheWrite::MemoryOnly(err)) => self.events.emit_sync_error(None, &err),
            Err(err) => {
                warn!(uid, error = %err, "failed to cache key");
                self.events.emit_sync_error(None, &err);
            }
        }
    }

    async fn start_session(
        &self,
        machine: &mut Machine,
        identity: Identity,
        key: CryptoKey,
    ) -> Result<()> {
        let coordinator = Arc::new(SyncCoordinator::new(
            identity.clone(),
            key.clone(),
            self.local.clone(),
            Arc::clone(&self.remote),
            self.events.clone(),
            self.config.sync,
        ));
        coordinator.start().await?;

        machine.identity = Some(identity.clone());
        machine.session = Some(Session {
            identity,
            key,
            coordinator,
        });
        self.transition(machine, AuthState::Ready);
        Ok(())
    }

    fn expect_state(&self, machine: &Machine, expected: AuthState) -> Result<Identity> {
        match (&machine.identity, machine.state) {
            (Some(identity), state) if state == expected => Ok(identity.clone()),
            (_, state) => Err(VaultError::InvalidState(format!(
                "expected {} but auth is {}",
                expected, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::storage::MemoryStore;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn machine(remote: &MemoryRemote) -> AuthStateMachine {
        let store = Arc::new(MemoryStore::new());
        AuthStateMachine::new(
            LocalStore::new(store.clone()),
            Arc::new(KeyCache::new(store)),
            Arc::new(remote.clone()),
            EventBus::new(),
            AuthConfig {
                sync: SyncConfig {
                    debounce: Duration::from_millis(20),
                },
                ..AuthConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_new_user_needs_create() {
        let remote = MemoryRemote::new();
        let auth = machine(&remote);
        auth.initialize().await.unwrap();

        let state = auth.login(Identity::new("alice")).await.unwrap();
        assert_eq!(state, AuthState::NeedsPassphraseCreate);
        assert_eq!(auth.state(), AuthState::NeedsPassphraseCreate);
    }

    #[tokio::test]
    async fn test_offline_login_is_transient_failure() {
        let remote = MemoryRemote::new();
        remote.set_online(false);
        let auth = machine(&remote);

        let err = auth.login(Identity::new("alice")).await.unwrap_err();
        assert!(matches!(err, VaultError::TransientAuthFailure(_)));
        assert_eq!(auth.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_incomplete_profile_routes_to_create() {
        let remote = MemoryRemote::new();
        remote
            .put_profile("alice", &RemoteProfile::default())
            .await
            .unwrap();
        let auth = machine(&remote);
        let mut errors = auth.events().sync_errors();

        let state = auth.login(Identity::new("alice")).await.unwrap();
        assert_eq!(state, AuthState::NeedsPassphraseCreate);
        assert_eq!(
            errors.recv().await.unwrap().kind,
            crate::error::ErrorKind::IncompleteAccount
        );
    }

    #[tokio::test]
    async fn test_short_passphrase_rejected_before_derivation() {
        let remote = MemoryRemote::new();
        let auth = machine(&remote);
        auth.login(Identity::new("alice")).await.unwrap();

        let err = auth.create_passphrase(&secret("short")).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
        assert_eq!(auth.kdf_runs(), 0);
        assert_eq!(auth.state(), AuthState::NeedsPassphraseCreate);
    }

    #[tokio::test]
    async fn test_unlock_in_wrong_state_is_rejected() {
        let remote = MemoryRemote::new();
        let auth = machine(&remote);
        let err = auth.unlock(&secret("correct horse")).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_derivations_run_once() {
        let remote = MemoryRemote::new();
        let auth = Arc::new(machine(&remote));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let auth = Arc::clone(&auth);
            handles.push(tokio::spawn(async move {
                auth.derive("alice", &secret("correct horse"), KdfParams::default())
                    .await
                    .unwrap()
                    .verification_hash()
            }));
        }
        let mut hashes = Vec::new();
        for handle in handles {
            hashes.push(handle.await.unwrap());
        }

        assert!(hashes.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(auth.kdf_runs(), 1);
    }

    #[tokio::test]
    async fn test_create_then_change_passphrase() {
        let remote = MemoryRemote::new();
        let auth = machine(&remote);
        auth.initialize().await.unwrap();
        auth.login(Identity::new("alice")).await.unwrap();
        auth.create_passphrase(&secret("correct horse")).await.unwrap();
        auth.local()
            .add_record("list-storage-todo", "rotate me")
            .await
            .unwrap();
        auth.session().await.unwrap().coordinator().flush().await.unwrap();

        let err = auth
            .change_passphrase(&secret("wrong horse"), &secret("battery staple"))
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::InvalidPassphrase);

        let before = auth.session().await.unwrap().key().clone();
        auth.change_passphrase(&secret("correct horse"), &secret("battery staple"))
            .await
            .unwrap();
        let after = auth.session().await.unwrap().key().clone();
        assert_ne!(before, after);

        let doc = remote.get("alice", "list-storage-todo").await.unwrap().unwrap();
        let decoded = decrypt_document(&doc, &after);
        assert!(decoded.failures.is_empty());
        assert_eq!(decoded.list.records[0].text, "rotate me");
    }
}
