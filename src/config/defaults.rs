//! System-wide default constants.
//!
//! Every tunable in `trilateration_config.toml` falls back to a value here.

// ============================================================================
// Configuration discovery
// ============================================================================

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "TRILATERATOR_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "trilateration_config.toml";

// ============================================================================
// Ingestion
// ============================================================================

/// Delay between two polls of the same anchor (ms).
pub const POLL_INTERVAL_MS: u64 = 2_000;

/// Capacity of the merged measurement queue shared by all anchors.
pub const MERGED_QUEUE_CAPACITY: usize = 1_000;

/// HTTP timeout for one anchor poll (seconds).
pub const ANCHOR_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound on the backoff between failed polls (ms).
pub const ANCHOR_MAX_BACKOFF_MS: u64 = 60_000;

/// Poll intervals below this are accepted but flagged.
pub const MIN_SENSIBLE_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// Router
// ============================================================================

/// Capacity of each per-device actor queue.
pub const DEVICE_QUEUE_CAPACITY: usize = 1_000;

// ============================================================================
// Egress
// ============================================================================

/// Capacity of the emission queue between actors and the sender task.
pub const EMISSION_QUEUE_CAPACITY: usize = 1_000;

/// Delivery attempts per estimate before giving up.
pub const DELIVERY_MAX_ATTEMPTS: u32 = 5;

/// First retry delay for a failed delivery (ms). Doubles per attempt.
pub const DELIVERY_INITIAL_BACKOFF_MS: u64 = 500;

/// Retry delay cap for deliveries (ms).
pub const DELIVERY_MAX_BACKOFF_MS: u64 = 30_000;

/// HTTP timeout for one delivery attempt (seconds).
pub const DELIVERY_REQUEST_TIMEOUT_SECS: u64 = 10;
