use locklist_core::AuthState;

use crate::app::{change_passphrase, AppContext};
use crate::config::{resolve_config_path, write_config, LocklistConfig};
use crate::errors::CliError;
use crate::output::status_json;

/// Write a default config file.
pub fn handle_init(force: bool, quiet: bool) -> anyhow::Result<()> {
    let path = resolve_config_path()?;
    if path.exists() && !force {
        return Err(CliError::invalid_input(format!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        ))
        .into());
    }
    write_config(&path, &LocklistConfig::default())?;
    if !quiet {
        println!("Wrote config to {}", path.display());
    }
    Ok(())
}

pub async fn handle_login(ctx: &AppContext<'_>, uid: &str) -> anyhow::Result<()> {
    if uid.trim().is_empty() {
        return Err(CliError::invalid_input("User id cannot be empty").into());
    }
    let state = ctx.login(uid).await?;
    if !ctx.quiet() {
        let lists = ctx.local().list_keys().await?.len();
        println!(
            "Signed in as {} ({}, {} list{})",
            uid,
            state,
            lists,
            if lists == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

pub async fn handle_logout(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    let who = ctx.saved_identity();
    ctx.logout().await?;
    if !ctx.quiet() {
        match who {
            Some(identity) => println!("Signed out {}; local lists erased.", identity.uid),
            None => println!("Not signed in; local lists erased."),
        }
    }
    Ok(())
}

pub async fn handle_passwd(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    ctx.require_session().await?;
    change_passphrase(ctx).await?;
    if !ctx.quiet() {
        println!("Passphrase changed; every list was re-encrypted.");
    }
    Ok(())
}

/// Report the sign-in state without prompting.
pub async fn handle_status(ctx: &AppContext<'_>, json: bool) -> anyhow::Result<()> {
    let identity = ctx.saved_identity();
    let state = match identity.clone() {
        Some(identity) => ctx.auth().handle_auth_event(Some(identity)).await?,
        None => AuthState::Anonymous,
    };
    let session = ctx.auth().session().await;
    let fingerprint = session.as_ref().map(|session| session.key().fingerprint());
    let pending = session
        .as_ref()
        .map(|session| session.coordinator().pending())
        .unwrap_or_default();
    let unreadable = session
        .as_ref()
        .map(|session| session.coordinator().unreadable_lists())
        .unwrap_or_default();
    let uid = identity.as_ref().map(|identity| identity.uid.as_str());

    if json {
        let output = status_json(
            uid,
            &state.to_string(),
            fingerprint.as_deref(),
            &pending,
            &unreadable,
        );
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match uid {
        Some(uid) => println!("User: {}", uid),
        None => println!("User: (anonymous)"),
    }
    println!("State: {}", state);
    if let Some(fingerprint) = fingerprint {
        println!("Key: {}", fingerprint);
    }
    if !pending.is_empty() {
        println!("Pending: {}", pending.join(", "));
    }
    if !unreadable.is_empty() {
        println!("Unreadable records kept in: {}", unreadable.join(", "));
    }
    if state == AuthState::NeedsPassphraseUnlock && !ctx.quiet() {
        println!("Run `locklist sync` to unlock.");
    }
    Ok(())
}
