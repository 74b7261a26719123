//! Flotilla — replicated cluster connection manager CLI.
//!
//! # Usage
//!
//! ```text
//! flotilla add <name> --uri <connection-uri> [--color <tag>] [--favorite]
//! flotilla list [--json]
//! flotilla watch
//! flotilla daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{add::AddArgs, daemon::DaemonCommand, list::ListArgs, watch::WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "flotilla",
    version,
    about = "Manage cluster connections replicated between a daemon and its views",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a new cluster with the running daemon.
    Add(AddArgs),

    /// List registered clusters and their runtime state.
    List(ListArgs),

    /// Attach as a live view and print state changes as they arrive.
    Watch(WatchArgs),

    /// Manage the flotilla background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Add(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
