//! Locklist CLI - local-first, end-to-end encrypted lists
//!
//! Command-line front end for the Locklist engine: sign-in and passphrase
//! prompts, list editing and sync control.

mod app;
mod cli;
mod commands;
mod config;
mod constants;
mod errors;
mod helpers;
mod output;
mod security;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::AppContext;
use cli::{Cli, Commands};
use commands::*;
use errors::exit_code_for;

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(&cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOCKLIST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::Init { force } = &cli.command {
        return handle_init(*force, cli.quiet);
    }

    let ctx = AppContext::open(cli).await?;
    let result = dispatch(&ctx).await;
    // Unsynced edits are pushed even when the command itself failed.
    let closed = ctx.close().await;
    result?;
    closed
}

async fn dispatch(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    match &ctx.cli().command {
        Commands::Init { .. } => Ok(()),
        Commands::Login { uid } => handle_login(ctx, uid).await,
        Commands::Logout => handle_logout(ctx).await,
        Commands::Passwd => handle_passwd(ctx).await,
        Commands::Status { json } => handle_status(ctx, *json).await,
        Commands::Lists { json } => handle_lists(ctx, *json).await,
        Commands::Show { list, json } => handle_show(ctx, list, *json).await,
        Commands::Add { list, text } => handle_add(ctx, list, text).await,
        Commands::Done { list, id } => handle_set_completed(ctx, list, id, true).await,
        Commands::Undo { list, id } => handle_set_completed(ctx, list, id, false).await,
        Commands::Edit { list, id, text } => handle_edit(ctx, list, id, text).await,
        Commands::Rm { list, id } => handle_rm(ctx, list, id).await,
        Commands::NewList { title } => handle_new_list(ctx, title).await,
        Commands::DeleteList { list } => handle_delete_list(ctx, list).await,
        Commands::Sync => handle_sync(ctx).await,
        Commands::Watch => handle_watch(ctx).await,
    }
}
