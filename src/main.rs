//! # Commit Tracker CLI (`ctrack`)
//!
//! The `ctrack` binary initializes the store, runs ingestion cycles, prints
//! stored commits and statistics, exports snapshots, and starts the HTTP
//! server with its ingestion scheduler.
//!
//! ## Usage
//!
//! ```bash
//! ctrack --config ./config/ctrack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctrack init` | Create the SQLite database and run schema migrations |
//! | `ctrack ingest` | Run one ingestion cycle in the foreground |
//! | `ctrack commits` | List the most recent stored commits |
//! | `ctrack stats` | Show store statistics |
//! | `ctrack export` | Write a JSON snapshot of recent commits |
//! | `ctrack analyze` | Annotate one commit message without storing it |
//! | `ctrack serve` | Start the HTTP server and the ingestion scheduler |
//!
//! ## Environment Variables
//!
//! - `GITHUB_TOKEN` (or the name set in `source.token_env`): API token, required
//!   by `ingest` and by the scheduler.
//! - `RUST_LOG`: overrides `--log-level`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commit_tracker::{analyzer, config, export, migrate, query, server, service, stats};

/// Commit Tracker: ingest, deduplicate and annotate commits from a remote
/// repository.
#[derive(Parser)]
#[command(name = "ctrack", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctrack.toml")]
    config: PathBuf,

    /// Log level (overridden by `RUST_LOG`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Run one ingestion cycle and print its report.
    Ingest,

    /// List the most recent stored commits.
    Commits {
        /// Maximum number of commits to show.
        #[arg(long, default_value_t = query::DEFAULT_LIMIT)]
        limit: i64,

        /// Only show commits of this repository (`owner/name`).
        #[arg(long)]
        repository: Option<String>,
    },

    /// Show store statistics.
    Stats,

    /// Export recent commits as a JSON snapshot.
    Export {
        /// Output file path. Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Annotate one commit message and print the analysis.
    ///
    /// Needs no database or configuration file.
    Analyze {
        /// The commit message to analyze.
        message: String,
    },

    /// Start the HTTP server and the ingestion scheduler.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let load = || {
        config::load_config(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))
    };

    match &cli.command {
        Commands::Init => {
            migrate::run_migrations(&load()?).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            service::run_ingest(&load()?).await?;
        }
        Commands::Commits { limit, repository } => {
            if *limit < 1 {
                anyhow::bail!("--limit must be at least 1");
            }
            query::run_commits(&load()?, *limit, repository.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&load()?).await?;
        }
        Commands::Export { output } => {
            export::run_export(&load()?, output.as_deref()).await?;
        }
        Commands::Analyze { message } => {
            analyzer::run_analyze(message)?;
        }
        Commands::Serve => {
            server::run_server(&load()?).await?;
        }
    }

    Ok(())
}
