//! EGL CLI: the `egl` command.

mod cli;
mod commands;
mod runner;
mod support;

use clap::Parser;
use cli::{Cli, Commands, LedgerCommands};
use tracing_subscriber::EnvFilter;

/// Log filter variable; defaults to `warn`.
const LOG_ENV: &str = "EGL_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::RunPack {
            pack,
            run_id,
            attest,
            source,
            now,
            repo_root,
        } => commands::run_pack::run(commands::run_pack::Args {
            pack,
            run_id,
            attest,
            source,
            now,
            repo_root,
        }),

        Commands::Seal { permit, write } => commands::seal::run(permit, write),

        Commands::Ledger { command } => match command {
            LedgerCommands::Verify {
                path,
                canonical,
                chain,
            } => commands::ledger::verify(path, canonical, chain),
        },

        Commands::Hash { file, stable } => commands::hash::run(file, stable),
    }
}
