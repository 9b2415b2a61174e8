//! Measurement source abstraction.
//!
//! Every anchor feed is a [`MeasurementSource`]: the HTTP pollers in
//! [`crate::acquisition`], a CSV replay, or JSON lines on stdin. The feed
//! task calls [`MeasurementSource::next_measurement`] in a select! with
//! cancellation and forwards what it gets to the merged queue.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::types::Measurement;

/// Events produced by a measurement source.
#[derive(Debug)]
pub enum SourceEvent {
    Measurement(Measurement),
    /// No more data will come from this source.
    Eof,
}

/// Trait abstracting where measurements come from.
///
/// Implementations handle parsing, reconnection, and pacing internally.
#[async_trait]
pub trait MeasurementSource: Send + 'static {
    /// Returns `Err` only on unrecoverable failures.
    async fn next_measurement(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded measurements with an optional delay between them.
pub struct ReplaySource {
    name: String,
    measurements: VecDeque<Measurement>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, measurements: Vec<Measurement>, delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            measurements: measurements.into(),
            delay_ms,
            yielded_first: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.measurements.len()
    }
}

#[async_trait]
impl MeasurementSource for ReplaySource {
    async fn next_measurement(&mut self) -> Result<SourceEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.measurements.pop_front() {
            Some(m) => {
                self.yielded_first = true;
                Ok(SourceEvent::Measurement(m))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

/// Load a replay file in the detection-log format written by
/// [`DetectionRecorder`](crate::egress::DetectionRecorder):
/// `"timestamp","device_key",anchor,distance,signal`.
///
/// A header line starting with `timestamp` is skipped, as are blank lines.
/// Malformed lines are logged and skipped.
pub fn load_replay_csv(path: &Path) -> Result<Vec<Measurement>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut measurements = Vec::new();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_num = idx + 1;
        let line = line_result
            .with_context(|| format!("Failed to read line {line_num} of {}", path.display()))?;
        let trimmed = line.trim();

        if trimmed.is_empty() || (line_num == 1 && unquote(trimmed).starts_with("timestamp")) {
            continue;
        }

        match parse_replay_line(trimmed, line_num) {
            Ok(m) => measurements.push(m),
            Err(e) => tracing::warn!(line = line_num, error = %e, "Skipping replay line"),
        }
    }

    tracing::info!(
        count = measurements.len(),
        path = %path.display(),
        "Loaded replay measurements"
    );
    Ok(measurements)
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

/// Split one CSV line, honouring double quotes and `""` escapes inside them.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn parse_replay_line(line: &str, line_num: usize) -> Result<Measurement, String> {
    let fields = split_fields(line);
    if fields.len() < 4 {
        return Err(format!(
            "Expected at least 4 fields, got {} on line {}",
            fields.len(),
            line_num
        ));
    }

    // Range checking of the anchor index is left to the device actor.
    let anchor_index: u8 = fields[2]
        .parse()
        .map_err(|e| format!("Bad anchor index '{}': {}", fields[2], e))?;
    let distance: f64 = fields[3]
        .parse()
        .map_err(|e| format!("Bad distance '{}': {}", fields[3], e))?;
    let signal_intensity: f64 = match fields.get(4) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| format!("Bad signal intensity '{raw}': {e}"))?,
        _ => 0.0,
    };

    Ok(Measurement {
        device_key: fields[1].clone(),
        anchor_index,
        distance,
        timestamp: fields[0].clone(),
        signal_intensity,
    })
}

// ============================================================================
// Stdin Source (JSON measurements, one per line)
// ============================================================================

/// Reads JSON measurements from stdin.
///
/// `{"device_key":"AA:BB:CC:DD:EE:FF","anchor_index":1,"distance":5.83}`
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(512),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeasurementSource for StdinSource {
    async fn next_measurement(&mut self) -> Result<SourceEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Measurement>(line) {
                Ok(m) => return Ok(SourceEvent::Measurement(m)),
                Err(e) => tracing::warn!("[StdinSource] Failed to parse measurement: {}", e),
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}
