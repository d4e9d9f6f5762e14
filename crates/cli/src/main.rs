//! Vigil CLI: the main entry point.
//!
//! Commands:
//! - `replay`  Drive a scripted lifecycle scenario through the telemetry core
//! - `config`  Show, validate or locate the SDK configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil: mobile telemetry core tooling",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file against the telemetry core
    Replay {
        /// Path to the scenario TOML
        scenario: PathBuf,

        /// Print enriched traces as compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Print a default configuration file
    Init,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { scenario, compact } => commands::replay::run(&scenario, compact)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Init => commands::config_cmd::init(),
        },
    }

    Ok(())
}
