//! Trilaterator - three-anchor device positioning service
//!
//! Polls three fixed anchors for device distance estimates, collects one
//! distance per anchor for each device, and solves for the device's 2-D
//! position.
//!
//! # Usage
//!
//! ```bash
//! # Poll the anchors listed in ./trilateration_config.toml
//! cargo run --release
//!
//! # Use a specific configuration file
//! ./trilaterator --config /etc/trilaterator/site.toml
//!
//! # Feed JSON measurements from stdin instead of polling
//! ./trilaterator --stdin < measurements.jsonl
//!
//! # Replay a recorded detection log
//! ./trilaterator --replay detected_addresses.csv --replay-delay-ms 10
//! ```
//!
//! # Environment Variables
//!
//! - `TRILATERATOR_CONFIG`: configuration file path when `--config` is not given
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trilaterator::acquisition::HttpAnchorSource;
use trilaterator::config::TrilaterationConfig;
use trilaterator::egress::{run_emitter, CsvRecorder, DetectionRecorder, EstimateSink, HttpSink};
use trilaterator::geometry::AnchorGeometry;
use trilaterator::pipeline::{
    load_replay_csv, run_anchor_feed, FeedEnd, IngestionRouter, MeasurementSource,
    PipelineCounters, ReplaySource, RouteHooks, RouterSettings, StdinSource,
};
use trilaterator::types::{AnchorIndex, Measurement, PipelineEvent};

/// How long tasks get to drain after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "trilaterator")]
#[command(about = "Three-anchor trilateration pipeline")]
#[command(version)]
struct CliArgs {
    /// Configuration file (default: $TRILATERATOR_CONFIG, then ./trilateration_config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read JSON measurements from stdin instead of polling the anchors
    #[arg(long, conflicts_with = "replay")]
    stdin: bool,

    /// Replay a detection log instead of polling the anchors
    #[arg(long, value_name = "CSV")]
    replay: Option<PathBuf>,

    /// Delay between replayed measurements (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    AnchorFeed(AnchorIndex),
    ReplayFeed,
    StdinFeed,
    Router,
    Emitter,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::AnchorFeed(anchor) => write!(f, "AnchorFeed({anchor})"),
            TaskName::ReplayFeed => write!(f, "ReplayFeed"),
            TaskName::StdinFeed => write!(f, "StdinFeed"),
            TaskName::Router => write!(f, "Router"),
            TaskName::Emitter => write!(f, "Emitter"),
        }
    }
}

// ============================================================================
// Task Spawning
// ============================================================================

fn spawn_feed<S: MeasurementSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    name: TaskName,
    source: S,
    tx: mpsc::Sender<Measurement>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let stats = run_anchor_feed(source, tx, cancel_token).await;
        if stats.ended_by == FeedEnd::SourceError {
            return Err(anyhow::anyhow!(
                "{} failed after {} measurements",
                name,
                stats.forwarded
            ));
        }
        Ok(name)
    });
}

/// Spawn one feed per input, according to the CLI mode.
fn spawn_feeds(
    task_set: &mut JoinSet<Result<TaskName>>,
    args: &CliArgs,
    config: &TrilaterationConfig,
    tx: &mpsc::Sender<Measurement>,
    cancel_token: &CancellationToken,
) -> Result<()> {
    if let Some(path) = &args.replay {
        let measurements = load_replay_csv(path)?;
        info!(
            "📥 Input: replay of {} ({} measurements, {}ms delay)",
            path.display(),
            measurements.len(),
            args.replay_delay_ms
        );
        let source = ReplaySource::new("replay", measurements, args.replay_delay_ms);
        spawn_feed(task_set, TaskName::ReplayFeed, source, tx.clone(), cancel_token.clone());
        return Ok(());
    }

    if args.stdin {
        info!("📥 Input: stdin (JSON measurements)");
        spawn_feed(task_set, TaskName::StdinFeed, StdinSource::new(), tx.clone(), cancel_token.clone());
        return Ok(());
    }

    for (position, anchor_config) in config.anchors.iter().enumerate() {
        let anchor = AnchorIndex::from_position(position)?;
        let source = HttpAnchorSource::new(anchor, anchor_config, &config.ingest)
            .with_context(|| format!("Failed to build HTTP client for anchor {anchor}"))?;
        info!(
            "📥 Input: anchor {} ({}) at ({}, {}) <- {}",
            anchor,
            anchor_config.display_name(position),
            anchor_config.x,
            anchor_config.y,
            anchor_config.input_url
        );
        spawn_feed(task_set, TaskName::AnchorFeed(anchor), source, tx.clone(), cancel_token.clone());
    }
    Ok(())
}

fn spawn_router<H: RouteHooks>(
    task_set: &mut JoinSet<Result<TaskName>>,
    router: IngestionRouter<H>,
    rx: mpsc::Receiver<Measurement>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Router] Task starting");
        router.run(rx, cancel_token).await;
        Ok(TaskName::Router)
    });
}

fn build_sinks(
    config: &TrilaterationConfig,
    cancel_token: &CancellationToken,
) -> Result<Vec<Box<dyn EstimateSink>>> {
    let mut sinks: Vec<Box<dyn EstimateSink>> = Vec::new();

    if let Some(url) = &config.output_url {
        info!("📤 Output: POST {}", url);
        sinks.push(Box::new(
            HttpSink::new(url.clone(), &config.egress, cancel_token.clone())
                .context("Failed to build output HTTP client")?,
        ));
    }

    if let Some(path) = &config.recording.results_csv {
        info!("📤 Output: results file {}", path.display());
        sinks.push(Box::new(CsvRecorder::open(path).with_context(|| {
            format!("Failed to open results file {}", path.display())
        })?));
    }

    if sinks.is_empty() {
        warn!("No output_url or results_csv configured, estimates are only logged");
    }
    Ok(sinks)
}

/// Monitor tasks until all complete. A failed or panicked task cancels the rest.
///
/// Once cancellation starts, remaining tasks get [`SHUTDOWN_GRACE`] to drain
/// before they are aborted.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");
    let mut failure: Option<anyhow::Error> = None;

    loop {
        let next = if cancel_token.is_cancelled() {
            match tokio::time::timeout(SHUTDOWN_GRACE, task_set.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("🔒 Supervisor: Tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
                    task_set.abort_all();
                    while task_set.join_next().await.is_some() {}
                    break;
                }
            }
        } else {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("🛑 Supervisor: Shutdown signal received, draining tasks");
                    continue;
                }
                next = task_set.join_next() => next,
            }
        };

        match next {
            Some(Ok(Ok(task_name))) => {
                info!("🔒 Supervisor: Task {} completed normally", task_name);
            }
            Some(Ok(Err(e))) => {
                error!("🔒 Supervisor: Task failed with error: {:#}", e);
                cancel_token.cancel();
                failure.get_or_insert(e);
            }
            Some(Err(e)) => {
                error!("🔒 Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                failure.get_or_insert(anyhow::anyhow!("Task panicked: {}", e));
            }
            None => {
                info!("🔒 Supervisor: All tasks completed");
                break;
            }
        }
    }

    failure.map_or(Ok(()), Err)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    // Anchors have no defaults: without a configuration there is nothing to do.
    let config = TrilaterationConfig::load(args.config.as_deref())
        .context("Failed to load trilateration configuration")?;
    let geometry = Arc::new(AnchorGeometry::from_config(&config).context("Invalid anchor layout")?);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Trilaterator - three-anchor device positioning");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for anchor in AnchorIndex::ALL {
        let p = geometry.anchor(anchor);
        info!("   Anchor {}: ({}, {})", anchor, p.x, p.y);
    }
    if geometry.is_degenerate() {
        warn!("Anchors are collinear: every complete triple will be reported as a geometry fault");
    }
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let counters = Arc::new(PipelineCounters::new());
    let (merged_tx, merged_rx) = mpsc::channel::<Measurement>(config.ingest.merged_queue_capacity);
    let (events_tx, events_rx) = mpsc::channel::<PipelineEvent>(config.egress.queue_capacity);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Emitter first, so nothing an actor emits can outlive its consumer.
    let sinks = build_sinks(&config, &cancel_token)?;
    let emitter_counters = Arc::clone(&counters);
    task_set.spawn(async move {
        info!("[Emitter] Task starting");
        run_emitter(events_rx, sinks, emitter_counters).await;
        Ok(TaskName::Emitter)
    });

    let router = IngestionRouter::new(
        Arc::clone(&geometry),
        RouterSettings::from(&config.router),
        events_tx,
        Arc::clone(&counters),
    );
    match &config.recording.detections_csv {
        Some(path) => {
            info!("📝 Recording detections to {}", path.display());
            let recorder = DetectionRecorder::open(path).with_context(|| {
                format!("Failed to open detections file {}", path.display())
            })?;
            spawn_router(&mut task_set, router.with_hooks(recorder), merged_rx, cancel_token.clone());
        }
        None => spawn_router(&mut task_set, router, merged_rx, cancel_token.clone()),
    }

    if let Err(e) = spawn_feeds(&mut task_set, &args, &config, &merged_tx, &cancel_token) {
        cancel_token.cancel();
        drop(merged_tx);
        while task_set.join_next().await.is_some() {}
        return Err(e);
    }
    // The feeds own the only senders now; the router stops when they all end.
    drop(merged_tx);

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    info!("");
    info!("{}", counters.snapshot());
    info!("✓ Trilaterator shutdown complete");
    outcome
}
