//! Config Validation Tests
//!
//! Exercises TOML loading, typo detection and range validation through the
//! public config API.

use std::io::Write;

use tokio_test::{assert_err, assert_ok};

use trilaterator::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use trilaterator::config::{ConfigError, OverflowPolicy, TrilaterationConfig};
use trilaterator::geometry::AnchorGeometry;

const SITE: &str = r#"
output_url = "http://127.0.0.1:5000/outputServerStub"

[[anchors]]
name = "north"
input_url = "http://127.0.0.1:5000/getData1"
x = 0.0
y = 0.0

[[anchors]]
name = "east"
input_url = "http://127.0.0.1:5000/getData2"
x = 10.0
y = 0.0

[[anchors]]
name = "south"
input_url = "http://127.0.0.1:5000/getData3"
x = 5.0
y = 10.0
"#;

fn with_section(extra: &str) -> String {
    format!("{SITE}\n{extra}")
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn minimal_site_config_uses_defaults() {
    let config = assert_ok!(TrilaterationConfig::from_toml_str(SITE));
    assert_eq!(config.anchors.len(), 3);
    assert_eq!(config.anchors[1].name, "east");
    assert_eq!(config.ingest.poll_interval_ms, 2000);
    assert_eq!(config.router.overflow, OverflowPolicy::Block);
    assert!(config.router.idle_eviction().is_none());
    assert!(config.recording.results_csv.is_none());
}

#[test]
fn anchor_list_order_defines_geometry() {
    let config = TrilaterationConfig::from_toml_str(SITE).unwrap();
    let geometry = AnchorGeometry::from_config(&config).unwrap();
    assert_eq!(geometry.xs(), &[0.0, 10.0, 5.0]);
    assert_eq!(geometry.ys(), &[0.0, 0.0, 10.0]);
    assert!(!geometry.is_degenerate());
}

#[test]
fn tuning_sections_parse() {
    let toml_str = with_section(
        r#"
[router]
overflow = "drop"
idle_eviction_secs = 600
device_queue_capacity = 16

[egress]
max_attempts = 2

[recording]
results_csv = "out/results.csv"
"#,
    );
    let config = TrilaterationConfig::from_toml_str(&toml_str).unwrap();
    assert_eq!(config.router.overflow, OverflowPolicy::DropNewest);
    assert_eq!(config.router.idle_eviction().map(|d| d.as_secs()), Some(600));
    assert_eq!(config.router.device_queue_capacity, 16);
    assert_eq!(config.egress.max_attempts, 2);
    assert_eq!(
        config.recording.results_csv.as_deref(),
        Some(std::path::Path::new("out/results.csv"))
    );
}

#[test]
fn load_from_file_and_missing_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SITE.as_bytes()).unwrap();
    file.flush().unwrap();

    let config = TrilaterationConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.anchors.len(), 3);

    let err = TrilaterationConfig::load(Some(std::path::Path::new("/nonexistent/site.toml")))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn two_anchors_is_fatal() {
    let toml_str = r#"
[[anchors]]
input_url = "http://a"
x = 0.0
y = 0.0

[[anchors]]
input_url = "http://b"
x = 1.0
y = 0.0
"#;
    match TrilaterationConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("exactly 3 anchors")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn syntax_error_is_parse_error() {
    let err = assert_err!(TrilaterationConfig::from_toml_str("[[anchors]\nx = "));
    assert!(matches!(err, ConfigError::Parse(..)));
}

#[test]
fn serialized_config_round_trips() {
    let config = TrilaterationConfig::from_toml_str(SITE).unwrap();
    let toml_str = config.to_toml().unwrap();
    let reparsed = TrilaterationConfig::from_toml_str(&toml_str).unwrap();
    assert_eq!(reparsed.anchors, config.anchors);
    assert_eq!(reparsed.output_url, config.output_url);
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn site_config_has_no_unknown_keys() {
    assert!(validate_unknown_keys(SITE).is_empty());
}

#[test]
fn serialized_config_has_no_unknown_keys() {
    let config = TrilaterationConfig::from_toml_str(SITE).unwrap();
    let warnings = validate_unknown_keys(&config.to_toml().unwrap());
    assert!(
        warnings.is_empty(),
        "got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn typo_in_anchor_table_is_suggested() {
    let toml_str = SITE.replacen("input_url = \"http://127.0.0.1:5000/getData1\"", "input_url = \"http://127.0.0.1:5000/getData1\"\ninptu_url = \"x\"", 1);
    let warnings = validate_unknown_keys(&toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "anchors.inptu_url");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("anchors.input_url"));
}

#[test]
fn typo_in_section_warns_but_loads() {
    let toml_str = with_section("[router]\noverflwo = \"drop\"\n");
    let warnings = validate_unknown_keys(&toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("router.overflow"));

    // Unknown keys never block startup; the misspelt value is simply ignored.
    let config = TrilaterationConfig::from_toml_str(&toml_str).unwrap();
    assert_eq!(config.router.overflow, OverflowPolicy::Block);
}

#[test]
fn garbage_key_has_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("zzz_completely_invalid_xyz_12345", &known).is_none());
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn collinear_anchors_warn() {
    let toml_str = SITE.replace("y = 10.0", "y = 0.0");
    let config: TrilaterationConfig = toml::from_str(&toml_str).unwrap();
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "anchors"));
}

#[test]
fn zero_capacity_is_an_error() {
    let config: TrilaterationConfig =
        toml::from_str(&with_section("[router]\ndevice_queue_capacity = 0\n")).unwrap();
    let (errors, _) = validate_ranges(&config);
    assert!(errors.iter().any(|e| e.contains("device_queue_capacity")));
}

#[test]
fn duplicate_input_url_warns() {
    let toml_str = SITE.replace("getData2", "getData1");
    let config: TrilaterationConfig = toml::from_str(&toml_str).unwrap();
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "anchors.input_url"));
}

#[test]
fn very_short_poll_interval_warns() {
    let config: TrilaterationConfig =
        toml::from_str(&with_section("[ingest]\npoll_interval_ms = 5\n")).unwrap();
    let (_, warnings) = validate_ranges(&config);
    assert!(warnings.iter().any(|w| w.field == "ingest.poll_interval_ms"));
}
