//! Command-line surface, defined with `clap`'s derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "bkpcore", version, about = "Content-addressed incremental backup engine")]
pub struct Cli {
    /// Repository root directory.
    #[arg(long, short = 'r', global = true, default_value = ".")]
    pub repo: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new, empty repository at `--repo`.
    Init,
    /// Register a new client with one or more root paths to back up.
    ClientAdd {
        name: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List registered clients.
    Clients,
    /// Run a backup for a registered client.
    Backup { client: String },
    /// Reconcile referenced fingerprints against the content store.
    Scan,
    /// Thoroughly crawl the content store, verifying every object.
    Check {
        #[arg(long)]
        repair: bool,
    },
    /// Restore a client's tree as of a date: 0 (the default) means latest, a positive value is
    /// an absolute timestamp (seconds since epoch), a negative value is relative to now in
    /// seconds (e.g. `-3600` for "one hour ago").
    Restore {
        client: String,
        dest: PathBuf,
        #[arg(long, default_value = "/")]
        prefix: String,
        #[arg(long, allow_hyphen_values = true, default_value_t = 0)]
        date: i64,
    },
}
