//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Contains the
//! execution logic for `poll` (the benchmark run) and `lookup` (one-shot build
//! resolution).
//!
//! Setup errors (missing `DATABASE_URL`, unreadable trigger file, no
//! credentials for any triggered platform) abort before a run is created.

use anyhow::{Context, Result};
use buildbench::config::{self, BenchConfig, Credentials};
use buildbench::db::Database;
use buildbench::model::{parse_trigger_results, Platform, TriggerType};
use buildbench::{
    BoundedPoller, BuildLookup, MemoryRecorder, Orchestrator, RunRecorder, RunSettings,
    StatusProvider, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Cli, Commands};

const DEFAULT_MAX_WAIT_SECS: u64 = 60 * 60;
const DEFAULT_INTERVAL_SECS: u64 = 10;

fn load_config(cli: &Cli) -> Result<BenchConfig> {
    match &cli.config {
        Some(path) => config::parse_toml_file(path),
        None => Ok(BenchConfig::default()),
    }
}

fn wait_budget(flag: Option<u64>, config: &BenchConfig) -> Duration {
    Duration::from_secs(
        flag.or(config.polling.max_wait_secs)
            .unwrap_or(DEFAULT_MAX_WAIT_SECS),
    )
}

fn poll_interval(flag: Option<u64>, config: &BenchConfig) -> Result<Duration> {
    let secs = flag
        .or(config.polling.interval_secs)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    if secs == 0 {
        anyhow::bail!("poll interval must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

// ── Poll ────────────────────────────────────────────────────────

/// Run one benchmark: monitor every triggered platform and record the run.
///
/// Exits non-zero on setup errors and when any triggered platform's terminal
/// status could not be stored. Per-platform failures and timeouts are normal
/// recorded outcomes.
pub fn run_poll(cli: &Cli) -> Result<()> {
    let Commands::Poll {
        trigger_results,
        max_wait_secs,
        poll_interval_secs,
        notes,
        event_name,
        dry_run,
    } = &cli.command
    else {
        anyhow::bail!("run_poll called for a different subcommand");
    };

    let database_url = if *dry_run {
        None
    } else {
        Some(cli.database_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
        })?)
    };

    let config = load_config(cli)?;
    let content = std::fs::read_to_string(trigger_results).with_context(|| {
        format!(
            "failed to read trigger results from {}",
            trigger_results.display()
        )
    })?;
    let triggers = parse_trigger_results(&content)
        .with_context(|| format!("invalid trigger results in {}", trigger_results.display()))?;

    let credentials = Credentials::from_env();
    let triggered: Vec<Platform> = triggers
        .iter()
        .filter(|t| t.triggered)
        .map(|t| t.platform)
        .collect();
    for platform in &triggered {
        if !credentials.has(*platform) {
            warn!(%platform, "no credentials configured, build will be recorded as failed");
        }
    }
    if !triggered.is_empty() && !triggered.iter().any(|p| credentials.has(*p)) {
        anyhow::bail!(
            "no platform credentials configured for any triggered platform (set GCP_*, VERCEL_* or NETLIFY_* variables)"
        );
    }
    let providers = config::build_providers(&credentials, &config);

    let settings = RunSettings {
        max_wait: wait_budget(*max_wait_secs, &config),
        poll_interval: poll_interval(*poll_interval_secs, &config)?,
        lookup: config.lookup.clone(),
        trigger_type: TriggerType::from_event_name(event_name.as_deref()),
        notes: notes.clone(),
    };
    info!(
        triggered = triggered.len(),
        skipped = triggers.len() - triggered.len(),
        max_wait_secs = settings.max_wait.as_secs(),
        interval_secs = settings.poll_interval.as_secs(),
        dry_run = *dry_run,
        "buildbench starting"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let recorder: Arc<dyn RunRecorder> = match database_url {
            Some(url) => Arc::new(
                Database::connect(url)
                    .await
                    .context("failed to connect to database")?,
            ),
            None => Arc::new(MemoryRecorder::new()),
        };
        Orchestrator::new(recorder, providers, Arc::new(SystemClock), settings)
            .run(&triggers)
            .await
    })?;

    println!("Benchmark run #{}", report.run_id);
    for line in report.summary_lines() {
        println!("  {}", line);
    }

    if !report.all_recorded() {
        anyhow::bail!(
            "{} of {} triggered platforms were not recorded",
            report.triggered_count() - report.recorded_count(),
            report.triggered_count()
        );
    }
    Ok(())
}

// ── Lookup ──────────────────────────────────────────────────────

/// Resolve one build and print its normalized snapshot as JSON.
pub fn run_lookup(cli: &Cli) -> Result<()> {
    let Commands::Lookup {
        platform,
        build_id,
        commit,
        after,
        max_scanned,
        follow,
    } = &cli.command
    else {
        anyhow::bail!("run_lookup called for a different subcommand");
    };

    let platform: Platform = platform.parse()?;
    let lookup = match (build_id, commit, after) {
        (Some(id), _, _) => BuildLookup::Id(id.clone()),
        (None, Some(sha), _) => BuildLookup::Commit(sha.clone()),
        (None, None, Some(after)) => BuildLookup::Window {
            after: chrono::DateTime::parse_from_rfc3339(after)
                .with_context(|| format!("--after is not an RFC 3339 timestamp: {}", after))?
                .with_timezone(&chrono::Utc),
            max_scanned: *max_scanned,
        },
        (None, None, None) => {
            anyhow::bail!("one of --build-id, --commit or --after is required")
        }
    };

    let config = load_config(cli)?;
    let providers = config::build_providers(&Credentials::from_env(), &config);
    let provider = providers
        .get(platform)
        .ok_or_else(|| anyhow::anyhow!("no credentials configured for {}", platform))?;

    let rt = tokio::runtime::Runtime::new()?;
    let snapshot = rt.block_on(async {
        let found = provider
            .find_build(&lookup)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no matching build found on {}", platform))?;
        if !*follow || (found.completed && found.status.is_terminal()) {
            return Ok::<_, anyhow::Error>(found);
        }
        let id = found
            .build_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} returned a build without an id", platform))?;
        let outcome = BoundedPoller::new(Arc::new(SystemClock))
            .run(
                provider.as_ref(),
                &id,
                wait_budget(None, &config),
                poll_interval(None, &config)?,
            )
            .await;
        Ok(outcome.snapshot)
    })?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
