//! Tally CLI - credit quota tracking
//!
//! A command-line interface for recording credit consumption against a
//! per-period allotment and inspecting the remaining balance.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about = "Credit quota tracking CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set TALLY_DB_PATH env var)
    #[arg(long, env = "TALLY_DB_PATH", global = true)]
    db: Option<String>,

    /// Ledger scope (tenant or client tag)
    #[arg(long, short, global = true, default_value = "default")]
    scope: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Record consumption and inspect the credit balance
    Credits {
        #[command(subcommand)]
        action: commands::credits::CreditsAction,
    },

    /// Manage per-scope credit settings
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var("TALLY_DB_PATH", db_path);
    }

    log::debug!("Running with scope {}", cli.scope);

    // Initialize database
    let db = tally_core::Database::new().await?;

    // Create context for commands
    let ctx = commands::Context {
        db,
        format: cli.format,
        quiet: cli.quiet,
        scope: cli.scope,
    };

    // Execute command
    match cli.command {
        Commands::Credits { action } => commands::credits::execute(&ctx, action).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
