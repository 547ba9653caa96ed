use locklist_core::events::ChangeOrigin;
use tokio::sync::broadcast::error::RecvError;

use crate::app::AppContext;

pub async fn handle_sync(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    let session = ctx.require_session().await?;
    let coordinator = session.coordinator();
    coordinator.pull().await?;
    coordinator.flush().await?;
    let pending = coordinator.retry_pending().await?;
    if !ctx.quiet() {
        let lists = ctx.local().list_keys().await?.len();
        if pending == 0 {
            println!("{} list{} in sync", lists, if lists == 1 { "" } else { "s" });
        } else {
            println!(
                "{} of {} lists could not be pushed; retry when the remote is reachable",
                pending, lists
            );
        }
    }
    Ok(())
}

/// Print change notifications until Ctrl-C.
pub async fn handle_watch(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    let session = ctx.require_session().await?;
    let events = ctx.auth().events();
    let mut changes = events.records_changed();
    let mut errors = events.sync_errors();
    if !ctx.quiet() {
        println!(
            "Watching lists for {} (Ctrl-C to stop)",
            session.identity().uid
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    let source = match change.origin {
                        ChangeOrigin::Local => "local",
                        ChangeOrigin::Remote => "remote",
                    };
                    println!("changed ({}): {}", source, change.storage_key);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            error = errors.recv() => match error {
                Ok(error) => eprintln!(
                    "sync error{}: {}",
                    error
                        .storage_key
                        .map(|key| format!(" ({})", key))
                        .unwrap_or_default(),
                    error.message
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
