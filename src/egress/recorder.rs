//! Append-only CSV recorders.
//!
//! Results line: `"device_key","timestamp",d1,d2,d3,x,y,"recorded_at"`
//! Detections line: `"timestamp","device_key",anchor,distance,signal`
//!
//! Text fields are quoted with embedded quotes doubled. Detection numbers use
//! the shortest form that parses back to the same `f64`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use super::{EgressError, EstimateSink};
use crate::pipeline::RouteHooks;
use crate::types::{Measurement, PositionEstimate};

fn open_append(path: &Path) -> Result<BufWriter<File>, EgressError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Results file sink.
pub struct CsvRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvRecorder {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EgressError> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn format_estimate_line(estimate: &PositionEstimate, recorded_at: &str) -> String {
    let [d1, d2, d3] = estimate.distances;
    format!(
        "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
        quoted(&estimate.device_key),
        quoted(&estimate.timestamp),
        d1,
        d2,
        d3,
        estimate.x,
        estimate.y,
        quoted(recorded_at)
    )
}

#[async_trait]
impl EstimateSink for CsvRecorder {
    async fn deliver(&mut self, estimate: &PositionEstimate) -> Result<(), EgressError> {
        let recorded_at = chrono::Utc::now().to_rfc3339();
        writeln!(self.writer, "{}", format_estimate_line(estimate, &recorded_at))?;
        self.writer.flush()?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EgressError> {
        self.writer.flush()?;
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "results-csv"
    }
}

/// Logs every measurement the router receives, including ones it drops.
///
/// Write failures are logged once and further writes are skipped, so a full
/// disk never stalls ingestion.
pub struct DetectionRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    failed: bool,
    written: u64,
}

impl DetectionRecorder {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EgressError> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self {
            path,
            writer,
            failed: false,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

pub(crate) fn format_detection_line(m: &Measurement) -> String {
    format!(
        "{},{},{},{},{}",
        quoted(&m.timestamp),
        quoted(&m.device_key),
        m.anchor_index,
        m.distance,
        m.signal_intensity
    )
}

impl RouteHooks for DetectionRecorder {
    fn on_measurement(&mut self, measurement: &Measurement) {
        if self.failed {
            return;
        }
        if let Err(e) = writeln!(self.writer, "{}", format_detection_line(measurement)) {
            warn!(path = %self.path.display(), error = %e, "Detection log write failed, disabling");
            self.failed = true;
            return;
        }
        self.written += 1;
    }

    fn on_shutdown(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush detection log");
        }
    }
}
