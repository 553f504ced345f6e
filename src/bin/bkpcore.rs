#![forbid(unsafe_code)]

use bkpcore::cli::{self, Cli, OutputMode};
use clap::Parser;
use log::LevelFilter;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = bkpcore::logging::init_for_repository(&cli.repo, LevelFilter::Info) {
        eprintln!("warning: failed to start file logging, falling back to console: {e}");
        let _ = bkpcore::logging::init_console(LevelFilter::Info);
    }

    let mode = match std::env::var("BKPCORE_OUTPUT").ok().as_deref() {
        Some("json") => OutputMode::Json,
        Some("plain") => OutputMode::Plain,
        _ => OutputMode::Human,
    };

    if let Err(e) = cli::run_with_format(&cli.repo, cli.command, mode) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
