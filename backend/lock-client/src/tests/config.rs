// Unit tests for lock-client configuration loading and validation

use crate::LOCK_HELPER_PATH;
use crate::config::LockClientConfig;
use crate::error::config::ConfigError;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::tempdir;

/// **VALUE**: Verifies the defaults: compile-time helper path, three retries, no deadline.
///
/// **WHY THIS MATTERS**: Most callers never write a config file. The defaults are the
/// behavior of the lock client in production.
///
/// **BUG THIS CATCHES**: Would catch a default retry budget other than three or a
/// response timeout enabled by default.
#[test]
fn given_no_overrides_when_default_created_then_uses_documented_defaults() {
    // GIVEN/WHEN: The default config
    let config = LockClientConfig::default();

    // THEN: Matches the documented defaults
    assert_eq!(config.helper_path, PathBuf::from(LOCK_HELPER_PATH));
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.response_timeout(), None);
    assert_eq!(config.stale_grace(), Duration::from_millis(250));
    assert!(config.validate().is_ok());
}

/// **VALUE**: Verifies that the helper path is built from the libexec dir and binary name.
///
/// **WHY THIS MATTERS**: The helper location is fixed at build time; a malformed path
/// means every lock fails with "not found".
///
/// **BUG THIS CATCHES**: Would catch a missing separator between directory and binary.
#[test]
fn given_build_constants_when_helper_path_composed_then_joins_dir_and_binary() {
    // GIVEN/WHEN: The composed constant
    let expected = format!(
        "{}/{}",
        crate::LOCK_HELPER_LIBEXEC_DIR,
        crate::LOCK_HELPER_BINARY
    );

    // THEN: Directory and binary joined by one slash
    assert_eq!(LOCK_HELPER_PATH, expected);
}

/// **VALUE**: Verifies a missing config file falls back to defaults.
///
/// **WHY THIS MATTERS**: First run never has a config file; that must not be an error.
///
/// **BUG THIS CATCHES**: Would catch `load()` returning `ReadError` for a missing file.
#[test]
fn given_missing_file_when_load_called_then_returns_defaults() {
    // GIVEN: An empty directory
    let dir = tempdir().unwrap();

    // WHEN: Loading
    let config = LockClientConfig::load(dir.path()).unwrap();

    // THEN: Defaults
    assert_eq!(config, LockClientConfig::default());
}

/// **VALUE**: Verifies that a partial TOML file overrides only the keys it names.
///
/// **WHY THIS MATTERS**: Users set one knob (usually the timeout) and expect the rest
/// to keep their defaults.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[serde(default)]` making every field
/// mandatory.
#[test]
fn given_partial_toml_when_load_called_then_merges_with_defaults() {
    // GIVEN: A config file setting the helper path and a timeout
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lock-client.toml"),
        "helper_path = \"/opt/helper/lockd\"\nresponse_timeout_ms = 1500\n",
    )
    .unwrap();

    // WHEN: Loading
    let config = LockClientConfig::load(dir.path()).unwrap();

    // THEN: Overrides applied, rest default
    assert_eq!(config.helper_path, PathBuf::from("/opt/helper/lockd"));
    assert_eq!(config.response_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.max_retries, 3);
}

/// **VALUE**: Verifies that malformed TOML is reported, not silently replaced by defaults.
///
/// **WHY THIS MATTERS**: A typo in the helper path silently reverting to the default
/// helper would be very hard to diagnose.
///
/// **BUG THIS CATCHES**: Would catch swallowing parse errors.
#[test]
fn given_malformed_toml_when_load_called_then_returns_parse_error() {
    // GIVEN: A broken file
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("lock-client.toml"), "max_retries = [oops").unwrap();

    // WHEN: Loading
    let result = LockClientConfig::load(dir.path());

    // THEN: ParseError naming the file
    match result {
        Err(ConfigError::ParseError { path, .. }) => {
            assert!(path.ends_with("lock-client.toml"));
        }
        other => panic!("Expected ParseError, got {other:?}"),
    }
}

/// **VALUE**: Verifies that out-of-range values fail validation.
///
/// **WHY THIS MATTERS**: A zero timeout would fail every request instantly; a huge retry
/// budget would spin against a broken helper.
///
/// **BUG THIS CATCHES**: Would catch any of the bounds checks being removed.
#[test]
fn given_out_of_range_values_when_validated_then_rejected() {
    // GIVEN: Configs each breaking one rule
    let invalid = [
        LockClientConfig::default().with_helper_path(""),
        LockClientConfig::default().with_max_retries(1_000),
        LockClientConfig::default().with_response_timeout(Some(Duration::ZERO)),
        LockClientConfig::default().with_stale_grace(Duration::from_secs(60)),
    ];

    // WHEN/THEN: Each is rejected
    for config in invalid {
        assert!(
            matches!(config.validate(), Err(ConfigError::ValidationError { .. })),
            "Should reject {config:?}"
        );
    }
}

/// **VALUE**: Verifies that the builder setters round-trip through TOML.
///
/// **WHY THIS MATTERS**: Configs written by tooling must load back identically.
///
/// **BUG THIS CATCHES**: Would catch a field renamed in serde but not in the struct.
#[test]
fn given_built_config_when_serialized_and_loaded_then_matches() {
    // GIVEN: A non-default config saved to disk
    let dir = tempdir().unwrap();
    let config = LockClientConfig::default()
        .with_helper_path("/usr/local/libexec/lock-helper")
        .with_max_retries(5)
        .with_response_timeout(Some(Duration::from_secs(2)))
        .with_stale_grace(Duration::from_millis(40));
    fs::write(
        dir.path().join("lock-client.toml"),
        toml::to_string(&config).unwrap(),
    )
    .unwrap();

    // WHEN: Loading it back
    let loaded = LockClientConfig::load(dir.path()).unwrap();

    // THEN: Identical
    assert_eq!(loaded, config);
}
