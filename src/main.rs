//! # Main: CLI Entry Point
//!
//! Routes subcommands to the execution functions in `cli.rs` and handles the
//! shared concerns: `.env` loading, structured logging, and global options.
//!
//! ## Subcommands
//!
//! - `poll`: read `trigger-results.json`, monitor every triggered platform
//!   concurrently, and record the run in PostgreSQL.
//! - `lookup`: resolve one platform build (by id, commit, or time window) and
//!   print it as JSON; `--follow` polls it to completion.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection for run storage.
//! - `--config`: optional TOML file with polling, lookup, and API base settings.
//!
//! Platform credentials come from the environment only (`GCP_PROJECT_ID`,
//! `GCP_ACCESS_TOKEN`, `VERCEL_API_TOKEN`, `VERCEL_TEAM_ID`,
//! `VERCEL_PROJECT_ID`, `NETLIFY_API_TOKEN`, `NETLIFY_SITE_ID`).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "buildbench",
    version,
    about = "Benchmark deployment build times across hosting platforms"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Optional TOML config file ([polling], [lookup], [platforms.<name>])
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll triggered builds to completion and record the benchmark run
    Poll {
        /// JSON file written by the trigger step
        #[arg(long, default_value = "trigger-results.json")]
        trigger_results: PathBuf,
        /// Wait budget per platform, measured from its trigger time
        #[arg(long)]
        max_wait_secs: Option<u64>,
        /// Seconds between status checks
        #[arg(long)]
        poll_interval_secs: Option<u64>,
        /// Free-text notes stored on the run
        #[arg(long, env = "RUN_NOTES")]
        notes: Option<String>,
        /// CI event name, used to derive the trigger type
        #[arg(long, env = "GITHUB_EVENT_NAME")]
        event_name: Option<String>,
        /// Record into process memory instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve a single platform build and print it as JSON
    Lookup {
        /// Platform to query (pantheon, vercel, netlify)
        #[arg(long)]
        platform: String,
        /// Explicit platform build / deployment id
        #[arg(long, conflicts_with_all = ["commit", "after"])]
        build_id: Option<String>,
        /// Commit SHA the build was made from
        #[arg(long, conflicts_with = "after")]
        commit: Option<String>,
        /// Earliest build starting at or after this RFC 3339 time
        #[arg(long)]
        after: Option<String>,
        /// How many recent builds a time-window lookup scans
        #[arg(long, default_value_t = 50)]
        max_scanned: u32,
        /// Poll the resolved build until it completes
        #[arg(long)]
        follow: bool,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for CI log shipping, human-readable otherwise.
    // Logs go to stderr; stdout carries the summary and JSON output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Poll { .. } => cli::run_poll(&cli),
        Commands::Lookup { .. } => cli::run_lookup(&cli),
    }
}
