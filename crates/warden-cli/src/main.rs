//! warden - run the watchdog against a registry snapshot.
//!
//! The snapshot is a JSON array of runs. It is loaded into the in-memory
//! registry, one invocation (or a loop of them) runs against it, and the
//! report is printed to stdout as JSON. `--output` writes the resulting runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use warden_core::app::{ReaperBuilder, ReaperLoop};
use warden_core::config::ReaperConfig;
use warden_core::domain::RunRecord;
use warden_core::impls::{InMemoryRunRegistry, TracingEventSink};
use warden_core::ports::{Clock, FixedClock, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Cancel stale and long-running runs.")]
struct Args {
    /// JSON array of runs to load into the registry.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// JSON config file; `WARDEN_*` env vars and the flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the registry's runs here after the last invocation.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    stale_threshold_hours: Option<f64>,

    #[arg(long)]
    long_running_threshold_hours: Option<f64>,

    #[arg(long)]
    grace_minutes: Option<u64>,

    #[arg(long)]
    overall_timeout_seconds: Option<u64>,

    #[arg(long)]
    per_query_timeout_seconds: Option<u64>,

    #[arg(long)]
    per_cancel_timeout_seconds: Option<u64>,

    /// Freeze the clock at this instant (RFC 3339) for replaying a snapshot.
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Pretend this invocation was scheduled this many minutes ago.
    #[arg(long, default_value_t = 0)]
    late_by_minutes: i64,

    /// Keep invoking at this interval until Ctrl-C.
    #[arg(long)]
    interval_seconds: Option<u64>,
}

impl Args {
    fn load_config(&self) -> Result<ReaperConfig> {
        let config = match &self.config {
            Some(path) => ReaperConfig::from_json_file(path)?,
            None => ReaperConfig::default(),
        };
        let mut config = config.apply_env()?;

        if let Some(hours) = self.stale_threshold_hours {
            config.stale_threshold_hours = hours;
        }
        if let Some(hours) = self.long_running_threshold_hours {
            config.long_running_threshold_hours = hours;
        }
        if let Some(minutes) = self.grace_minutes {
            config.grace_minutes = minutes;
        }
        if let Some(seconds) = self.overall_timeout_seconds {
            config.overall_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.per_query_timeout_seconds {
            config.per_query_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.per_cancel_timeout_seconds {
            config.per_cancel_timeout_seconds = seconds;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_core=info,warden=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.load_config().context("loading configuration")?;
    info!(?config, "loaded configuration");

    let clock: Arc<dyn Clock> = match args.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let registry = Arc::new(InMemoryRunRegistry::new(Arc::clone(&clock)));
    if let Some(path) = &args.snapshot {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let runs: Vec<RunRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        info!(runs = runs.len(), "loaded snapshot");
        for run in runs {
            registry.insert(run).await;
        }
    }

    let reaper = ReaperBuilder::new()
        .registry(registry.clone())
        .clock(Arc::clone(&clock))
        .events(Arc::new(TracingEventSink::new()))
        .config(config)
        .build()
        .context("building reaper")?;

    let reaper_loop = ReaperLoop::new(Arc::new(reaper), registry.clone(), Arc::clone(&clock));

    match args.interval_seconds {
        None => {
            let scheduled_at = chrono::Duration::try_minutes(args.late_by_minutes)
                .and_then(|late| clock.now().checked_sub_signed(late))
                .context("--late-by-minutes is out of range")?;
            let report = reaper_loop
                .run_once(scheduled_at)
                .await
                .context("running watchdog invocation")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(seconds) => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                }
                let _ = shutdown_tx.send(true);
            });
            let started = reaper_loop
                .run(Duration::from_secs(seconds), shutdown_rx)
                .await?;
            info!(started, "loop stopped");
        }
    }

    if let Some(path) = &args.output {
        let mut runs = registry.runs().await;
        runs.sort_by_key(|r| r.id);
        std::fs::write(path, serde_json::to_string_pretty(&runs)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
