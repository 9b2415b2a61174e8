//! Anchor Mock - development stand-in for the three anchors and the output server
//!
//! Serves `GET /getData1`..`/getData3` with Kismet-style record arrays for a
//! set of simulated devices at known positions, and accepts estimates on
//! `POST /outputServerStub`.
//!
//! # Usage
//! ```bash
//! ./anchor-mock --bind 127.0.0.1:5000 --devices 5 --jitter 0.05
//! ./trilaterator --config demo.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use rand::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};

use trilaterator::acquisition::KismetRecord;
use trilaterator::config::TrilaterationConfig;
use trilaterator::geometry::Point2;
use trilaterator::types::{AnchorIndex, ANCHOR_COUNT};

/// Anchor layout used when no configuration is given.
const DEFAULT_ANCHORS: [Point2; ANCHOR_COUNT] = [
    Point2 { x: 0.0, y: 0.0 },
    Point2 { x: 10.0, y: 0.0 },
    Point2 { x: 5.0, y: 10.0 },
];

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "anchor-mock")]
#[command(about = "Mock anchors and output server for trilaterator development")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Take the anchor layout from this configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of simulated devices
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=1000))]
    devices: u32,

    /// Uniform distance noise in +/- units (0 = exact distances)
    #[arg(long, default_value = "0.0")]
    jitter: f64,

    /// Random seed for device placement and noise
    #[arg(long, default_value = "7")]
    seed: u64,
}

// ============================================================================
// Simulation State
// ============================================================================

struct SimulatedDevice {
    macaddr: String,
    position: Point2,
}

struct MockState {
    anchors: [Point2; ANCHOR_COUNT],
    devices: Vec<SimulatedDevice>,
    jitter: f64,
    rng: Mutex<StdRng>,
    estimates_received: AtomicU64,
}

impl MockState {
    fn new(anchors: [Point2; ANCHOR_COUNT], device_count: u32, jitter: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let (min_x, max_x) = bounds(anchors.map(|p| p.x));
        let (min_y, max_y) = bounds(anchors.map(|p| p.y));
        let devices = (0..device_count)
            .map(|i| SimulatedDevice {
                macaddr: format!("02:00:00:00:{:02X}:{:02X}", i >> 8, i & 0xFF),
                position: Point2::new(
                    sample(&mut rng, min_x, max_x),
                    sample(&mut rng, min_y, max_y),
                ),
            })
            .collect();

        Self {
            anchors,
            devices,
            jitter,
            rng: Mutex::new(rng),
            estimates_received: AtomicU64::new(0),
        }
    }

    fn records_for(&self, anchor: AnchorIndex) -> Vec<KismetRecord> {
        let anchor_position = self.anchors[anchor.slot()];
        let last_time = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let Ok(mut rng) = self.rng.lock() else {
            return Vec::new();
        };

        self.devices
            .iter()
            .map(|device| {
                let exact = anchor_position.distance_to(&device.position);
                let noise = if self.jitter > 0.0 {
                    rng.gen_range(-self.jitter..=self.jitter)
                } else {
                    0.0
                };
                let distance = (exact + noise).max(0.01);
                KismetRecord {
                    last_time: last_time.clone(),
                    macaddr: device.macaddr.clone(),
                    distance,
                    signal_intensity: -40.0 - 2.0 * distance,
                }
            })
            .collect()
    }
}

fn bounds(values: [f64; ANCHOR_COUNT]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

fn sample(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct DataQuery {
    timestamp: Option<String>,
}

async fn serve_anchor(
    state: &MockState,
    anchor: AnchorIndex,
    query: DataQuery,
) -> Json<Vec<KismetRecord>> {
    let records = state.records_for(anchor);
    info!(
        anchor = %anchor,
        since = query.timestamp.as_deref().unwrap_or("-"),
        records = records.len(),
        "Serving anchor data"
    );
    Json(records)
}

async fn get_data1(
    State(state): State<Arc<MockState>>,
    Query(query): Query<DataQuery>,
) -> Json<Vec<KismetRecord>> {
    serve_anchor(&state, AnchorIndex::FIRST, query).await
}

async fn get_data2(
    State(state): State<Arc<MockState>>,
    Query(query): Query<DataQuery>,
) -> Json<Vec<KismetRecord>> {
    serve_anchor(&state, AnchorIndex::SECOND, query).await
}

async fn get_data3(
    State(state): State<Arc<MockState>>,
    Query(query): Query<DataQuery>,
) -> Json<Vec<KismetRecord>> {
    serve_anchor(&state, AnchorIndex::THIRD, query).await
}

async fn output_server_stub(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let n = state.estimates_received.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        n,
        macaddr = %body["Macaddr"],
        x = %body["X"],
        y = %body["Y"],
        "Estimate received"
    );
    Json(serde_json::json!({
        "isError": false,
        "message": "Success",
        "statusCode": 200,
        "data": body,
    }))
}

fn build_router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/getData1", get(get_data1))
        .route("/getData2", get(get_data2))
        .route("/getData3", get(get_data3))
        .route("/outputServerStub", post(output_server_stub))
        .with_state(state)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if !args.jitter.is_finite() || args.jitter < 0.0 {
        anyhow::bail!("--jitter must be a finite, non-negative number");
    }

    let anchors = match &args.config {
        Some(path) => {
            let config = TrilaterationConfig::load(Some(path.as_path()))?;
            let geometry = trilaterator::AnchorGeometry::from_config(&config)?;
            AnchorIndex::ALL.map(|a| geometry.anchor(a))
        }
        None => DEFAULT_ANCHORS,
    };

    let state = Arc::new(MockState::new(anchors, args.devices, args.jitter, args.seed));
    for (i, anchor) in anchors.iter().enumerate() {
        info!("Anchor {}: ({}, {}) -> GET http://{}/getData{}", i + 1, anchor.x, anchor.y, args.bind, i + 1);
    }
    for device in &state.devices {
        info!(
            macaddr = %device.macaddr,
            x = device.position.x,
            y = device.position.y,
            "Simulated device"
        );
    }
    if args.jitter > 0.0 {
        warn!(jitter = args.jitter, "Distances carry noise, estimates will not be exact");
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(address = %args.bind, "Anchor mock listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
