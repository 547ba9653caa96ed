use clap::{Parser, Subcommand};

use locklist_core::VERSION;

/// Locklist - local-first, end-to-end encrypted lists
#[derive(Parser)]
#[command(name = "locklist")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable interactive prompts
    #[arg(long, global = true)]
    pub no_input: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Sign in, creating or unlocking the account's passphrase
    Login {
        /// User identifier
        #[arg(value_name = "UID")]
        uid: String,
    },

    /// Sign out and erase this device's lists and cached key
    Logout,

    /// Change the passphrase and re-encrypt every list
    Passwd,

    /// Show who is signed in and the sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all lists
    Lists {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the items of a list
    Show {
        /// List title, slug or storage key
        #[arg(value_name = "LIST")]
        list: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add an item to a list
    Add {
        #[arg(value_name = "LIST")]
        list: String,

        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Mark an item done
    Done {
        #[arg(value_name = "LIST")]
        list: String,

        /// Item id or unique id prefix
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Mark an item not done
    Undo {
        #[arg(value_name = "LIST")]
        list: String,

        #[arg(value_name = "ID")]
        id: String,
    },

    /// Replace an item's text
    Edit {
        #[arg(value_name = "LIST")]
        list: String,

        #[arg(value_name = "ID")]
        id: String,

        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Remove an item
    Rm {
        #[arg(value_name = "LIST")]
        list: String,

        #[arg(value_name = "ID")]
        id: String,
    },

    /// Create a new list
    NewList {
        #[arg(value_name = "TITLE")]
        title: String,
    },

    /// Delete a list everywhere
    DeleteList {
        #[arg(value_name = "LIST")]
        list: String,
    },

    /// Pull remote changes and push anything pending
    Sync,

    /// Keep syncing and print changes until interrupted
    Watch,
}
