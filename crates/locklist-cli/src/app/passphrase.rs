//! Passphrase prompting and the unlock retry loop.

use std::io::IsTerminal;

use dialoguer::Password;
use secrecy::SecretString;

use locklist_core::{AuthState, VaultError};

use crate::constants::MAX_PASSPHRASE_ATTEMPTS;
use crate::errors::CliError;

use super::context::AppContext;

const FORGOTTEN_HINT: &str = "Hint: If you forgot your passphrase, your lists cannot be recovered.\n      `locklist logout` keeps the encrypted copies on the remote.";

/// Drive a freshly signed-in machine to `Ready`.
pub async fn complete_login(ctx: &AppContext<'_>, state: AuthState) -> anyhow::Result<()> {
    match state {
        AuthState::Ready => Ok(()),
        AuthState::NeedsPassphraseCreate => create_account(ctx).await,
        AuthState::NeedsPassphraseUnlock => unlock_with_retry(ctx).await,
        other => Err(anyhow::anyhow!("Unexpected sign-in state: {}", other)),
    }
}

async fn create_account(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    if !ctx.quiet() {
        println!("No account found for this user. Choose a passphrase to create one.");
    }
    let passphrase = prompt_new_passphrase(interactive(ctx), "LOCKLIST_PASSPHRASE")?;
    match ctx.auth().create_passphrase(&passphrase).await {
        Ok(()) => Ok(()),
        Err(VaultError::InvalidInput(message)) => Err(CliError::invalid_input(message).into()),
        Err(err) => Err(err.into()),
    }
}

async fn unlock_with_retry(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    if let Some(passphrase) = env_passphrase("LOCKLIST_PASSPHRASE") {
        return match ctx.auth().unlock(&passphrase).await {
            Ok(()) => Ok(()),
            Err(VaultError::InvalidPassphrase) => {
                Err(CliError::auth_failed("Incorrect passphrase.").into())
            }
            Err(err) => Err(err.into()),
        };
    }

    let interactive = interactive(ctx);
    let test_attempts = if !interactive && cfg!(feature = "test-support") {
        std::env::var("LOCKLIST_TEST_PASSPHRASE_ATTEMPTS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<String>>()
            })
    } else {
        None
    };
    let max_attempts: u32 = if interactive || test_attempts.is_some() {
        MAX_PASSPHRASE_ATTEMPTS
    } else {
        1
    };
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let passphrase = match test_attempts.as_ref() {
            Some(values) => values
                .get((attempts - 1) as usize)
                .cloned()
                .map(SecretString::from)
                .ok_or_else(|| anyhow::anyhow!("No passphrase attempts remaining"))?,
            None => prompt_passphrase(interactive, "Passphrase")?,
        };
        match ctx.auth().unlock(&passphrase).await {
            Ok(()) => return Ok(()),
            Err(VaultError::InvalidPassphrase) => {
                let remaining = max_attempts.saturating_sub(attempts);
                if remaining == 0 {
                    return Err(CliError::auth_failed_with_hint(
                        "Too many failed passphrase attempts.",
                        FORGOTTEN_HINT,
                    )
                    .into());
                }
                eprintln!(
                    "Incorrect passphrase. {} attempt{} remaining.",
                    remaining,
                    if remaining == 1 { "" } else { "s" }
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Prompt for the current and a new passphrase and re-encrypt.
pub async fn change_passphrase(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    let interactive = interactive(ctx);
    let old = match env_passphrase("LOCKLIST_PASSPHRASE") {
        Some(passphrase) => passphrase,
        None => prompt_passphrase(interactive, "Current passphrase")?,
    };
    let new = prompt_new_passphrase(interactive, "LOCKLIST_NEW_PASSPHRASE")?;
    match ctx.auth().change_passphrase(&old, &new).await {
        Ok(()) => Ok(()),
        Err(VaultError::InvalidPassphrase) => {
            Err(CliError::auth_failed("Incorrect passphrase.").into())
        }
        Err(VaultError::InvalidInput(message)) => Err(CliError::invalid_input(message).into()),
        Err(err) => Err(err.into()),
    }
}

fn interactive(ctx: &AppContext<'_>) -> bool {
    !ctx.cli().no_input && std::io::stdin().is_terminal()
}

fn env_passphrase(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

fn prompt_passphrase(interactive: bool, prompt: &str) -> anyhow::Result<SecretString> {
    if !interactive {
        return Err(anyhow::anyhow!(
            "No passphrase provided and no TTY available. Set LOCKLIST_PASSPHRASE."
        ));
    }
    Password::new()
        .with_prompt(prompt)
        .interact()
        .map(SecretString::from)
        .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))
}

fn prompt_new_passphrase(interactive: bool, var: &str) -> anyhow::Result<SecretString> {
    if let Some(passphrase) = env_passphrase(var) {
        return Ok(passphrase);
    }
    if !interactive {
        return Err(anyhow::anyhow!(
            "No passphrase provided and no TTY available. Set {}.",
            var
        ));
    }
    Password::new()
        .with_prompt("New passphrase")
        .with_confirmation("Confirm passphrase", "Passphrases do not match")
        .interact()
        .map(SecretString::from)
        .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))
}
