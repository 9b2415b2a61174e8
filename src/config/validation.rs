//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Unknown keys are found by walking the raw `toml::Value` tree before serde
//! sees it; they only produce warnings. Range checks run on the parsed
//! config and split into fatal errors and warnings.

use std::collections::HashSet;

use super::defaults;
use super::TrilaterationConfig;
use crate::geometry::AnchorGeometry;
use crate::types::ANCHOR_COUNT;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " - did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths.
///
/// Array-of-table entries (`[[anchors]]`) share the array's prefix.
/// Must be kept in step with the structs in settings.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "output_url",
        // [[anchors]]
        "anchors",
        "anchors.name",
        "anchors.input_url",
        "anchors.x",
        "anchors.y",
        // [ingest]
        "ingest",
        "ingest.poll_interval_ms",
        "ingest.merged_queue_capacity",
        "ingest.request_timeout_secs",
        "ingest.max_backoff_ms",
        // [router]
        "router",
        "router.device_queue_capacity",
        "router.overflow",
        "router.idle_eviction_secs",
        // [egress]
        "egress",
        "egress.queue_capacity",
        "egress.max_attempts",
        "egress.initial_backoff_ms",
        "egress.max_backoff_ms",
        "egress.request_timeout_secs",
        // [recording]
        "recording",
        "recording.results_csv",
        "recording.detections_csv",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`. Tables
/// inside arrays are walked under the array's own path.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            } else if let Some(items) = v.as_array() {
                for item in items.iter().filter(|i| i.is_table()) {
                    for nested in walk_toml_keys(item, &path) {
                        if !keys.contains(&nested) {
                            keys.push(nested);
                        }
                    }
                }
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails; syntax errors are reported by serde afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate values on a parsed config.
///
/// Returns (errors, warnings). Errors prevent startup.
pub fn validate_ranges(config: &TrilaterationConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.anchors.len() != ANCHOR_COUNT {
        errors.push(format!(
            "exactly {ANCHOR_COUNT} anchors are required, found {}",
            config.anchors.len()
        ));
    }

    for (i, anchor) in config.anchors.iter().enumerate() {
        if !anchor.x.is_finite() || !anchor.y.is_finite() {
            errors.push(format!("anchors[{i}] has non-finite coordinates"));
        }
        if anchor.input_url.trim().is_empty() {
            errors.push(format!("anchors[{i}].input_url is empty"));
        }
    }

    if config.ingest.merged_queue_capacity == 0 {
        errors.push("ingest.merged_queue_capacity must be > 0".to_string());
    }
    if config.router.device_queue_capacity == 0 {
        errors.push("router.device_queue_capacity must be > 0".to_string());
    }
    if config.egress.queue_capacity == 0 {
        errors.push("egress.queue_capacity must be > 0".to_string());
    }
    if config.egress.max_attempts == 0 {
        errors.push("egress.max_attempts must be > 0".to_string());
    }

    if errors.is_empty() {
        if let Ok(geometry) = AnchorGeometry::from_config(config) {
            if geometry.is_degenerate() {
                warnings.push(ValidationWarning {
                    field: "anchors".to_string(),
                    message: "anchors are collinear or coincident; every position solve will fail"
                        .to_string(),
                    suggestion: None,
                });
            }
        }
    }

    let mut seen = HashSet::new();
    for anchor in &config.anchors {
        if !seen.insert(anchor.input_url.as_str()) {
            warnings.push(ValidationWarning {
                field: "anchors.input_url".to_string(),
                message: format!("input_url '{}' is used by more than one anchor", anchor.input_url),
                suggestion: None,
            });
        }
    }

    if config.ingest.poll_interval_ms < defaults::MIN_SENSIBLE_POLL_INTERVAL_MS {
        warnings.push(ValidationWarning {
            field: "ingest.poll_interval_ms".to_string(),
            message: format!(
                "poll_interval_ms = {} is below {} ms and will hammer the anchors",
                config.ingest.poll_interval_ms,
                defaults::MIN_SENSIBLE_POLL_INTERVAL_MS
            ),
            suggestion: None,
        });
    }

    if config.egress.initial_backoff_ms > config.egress.max_backoff_ms {
        warnings.push(ValidationWarning {
            field: "egress.initial_backoff_ms".to_string(),
            message: "egress.initial_backoff_ms exceeds egress.max_backoff_ms; retries use the cap"
                .to_string(),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
