//! Depot CLI - Command-line interface for the depot object store.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Pack-organized content-addressed object store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new depot store
    Init,
    /// Snapshot a directory as a new commit
    Commit {
        /// Directory to snapshot
        path: std::path::PathBuf,
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Branch to advance
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// List packs in the catalog
    Packs,
    /// Garbage collect and repack the store
    Gc {
        /// Retention window for unreachable packs, in hours (0 disables expiry)
        #[arg(long)]
        ttl_hours: Option<i64>,
        /// Upper size bound in bytes for coalescing garbage packs (0 disables)
        #[arg(long)]
        coalesce_limit: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Commit {
            path,
            message,
            branch,
        } => commands::commit::run(&path, &message, &branch),
        Commands::Packs => commands::packs::run(),
        Commands::Gc {
            ttl_hours,
            coalesce_limit,
        } => commands::gc::run(ttl_hours, coalesce_limit),
    }
}
