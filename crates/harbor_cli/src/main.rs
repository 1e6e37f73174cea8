//! Harbor CLI
//!
//! Command-line tools for inspecting and maintaining Harbor stores.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `queue` - List pending or failed actions
//! - `sweep` - Remove expired and corrupt records
//! - `reset` - Delete every record in the namespace
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Harbor command-line store tools.
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Store namespace
    #[arg(global = true, short, long, default_value = "harbor")]
    namespace: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued actions
    Queue {
        /// List failed actions instead of pending ones
        #[arg(long)]
        failed: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove expired and corrupt records
    Sweep {
        /// Dry run - show what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Delete every record in the namespace
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &cli.namespace, &format)?;
        }
        Commands::Queue { failed, format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, &cli.namespace, failed, &format)?;
        }
        Commands::Sweep { dry_run } => {
            let path = cli.path.ok_or("Store path required for sweep")?;
            commands::sweep::run(&path, &cli.namespace, dry_run)?;
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Store path required for reset")?;
            commands::reset::run(&path, &cli.namespace, yes)?;
        }
        Commands::Version => {
            println!("Harbor CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Harbor Core v{}", harbor_core::VERSION);
        }
    }

    Ok(())
}
