//! promptweave CLI — the main entry point.
//!
//! Commands:
//! - `init`     — Print (or write) the default configuration
//! - `select`   — Show which fragments activate for some text
//! - `assemble` — Run a full assembly pass over a scenario file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "promptweave",
    about = "promptweave — context assembly for lorebook-driven prompts",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.promptweave/config.toml
    #[arg(short, long, global = true, env = "PROMPTWEAVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration
    Init {
        /// Write it to ~/.promptweave/config.toml if no config exists yet
        #[arg(long)]
        write: bool,
    },

    /// Show which fragments activate for some text
    Select {
        /// World book JSON file (repeatable)
        #[arg(short, long = "world", required = true)]
        worlds: Vec<PathBuf>,

        /// Trigger text to match keys against
        #[arg(short, long)]
        keywords: String,

        /// Seed for probability rolls and weighted group picks
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run a full assembly pass over a scenario file
    Assemble {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Seed for probability rolls and weighted group picks
        #[arg(long)]
        seed: Option<u64>,

        /// Do not commit variable writes
        #[arg(long)]
        preview: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        Commands::Init { write } => commands::init::run(write).await?,
        Commands::Select {
            worlds,
            keywords,
            seed,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::select::run(config, &worlds, &keywords, seed).await?
        }
        Commands::Assemble {
            scenario,
            seed,
            preview,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::assemble::run(config, &scenario, seed, preview).await?
        }
    }

    Ok(())
}
