mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Types
// ============================================================================

/// dumpwarden - scheduled, encrypted database backups with off-box delivery
#[derive(Parser, Debug)]
#[command(version = dumpwarden::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run backup cycles (continuously, or once with --once)
    Run {
        /// Path to configuration file (falls back to environment variables if missing)
        #[arg(short, long, default_value = "dumpwarden.yaml")]
        config: PathBuf,

        /// Run a single cycle and exit with its status
        #[arg(long)]
        once: bool,
    },

    /// Validate configuration and tool availability
    Check {
        /// Path to configuration file (falls back to environment variables if missing)
        #[arg(short, long, default_value = "dumpwarden.yaml")]
        config: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, once } => commands::run::run(&config, once).await,
        Commands::Check { config, format } => commands::check::run(&config, &format).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
