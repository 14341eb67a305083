// Unit tests for mode parsing

use crate::config::{HelperConfig, Mode};
use crate::error::HelperError;

/// **VALUE**: Verifies every mode name parses back to its mode.
///
/// **WHY THIS MATTERS**: Integration tests select behavior by name through the
/// environment. A name that no longer parses silently falls into an error exit.
///
/// **BUG THIS CATCHES**: Would catch a mode added to the enum but missing from `ALL`.
#[test]
fn given_mode_names_when_parsed_then_round_trip() {
    // GIVEN: Every mode's display name
    let names = [
        ("normal", Mode::Normal),
        ("stale-first", Mode::StaleFirst),
        ("always-stale", Mode::AlwaysStale),
        ("slow-first", Mode::SlowFirst),
        ("late-answer", Mode::LateAnswer),
        ("die-once", Mode::DieOnce),
        ("hang", Mode::Hang),
        ("bad-magic", Mode::BadMagic),
        ("future-sequence", Mode::FutureSequence),
        ("linger", Mode::Linger),
    ];

    // WHEN/THEN: Parsing gives back the mode, and display gives back the name
    for (name, mode) in names {
        assert_eq!(name.parse::<Mode>().unwrap(), mode);
        assert_eq!(mode.to_string(), name);
    }
    assert_eq!(" hang\n".parse::<Mode>().unwrap(), Mode::Hang);
}

/// **VALUE**: Verifies an unknown mode is a config error naming the bad value.
///
/// **WHY THIS MATTERS**: Falling back to `normal` would make a misspelled test
/// scenario pass for the wrong reason.
///
/// **BUG THIS CATCHES**: Would catch a catch-all arm defaulting to `Normal`.
#[test]
fn given_unknown_mode_when_parsed_then_config_error() {
    // GIVEN/WHEN: A misspelled mode
    let result = "stale-frist".parse::<Mode>();

    // THEN: Config error naming it
    match result {
        Err(HelperError::Config { message, .. }) => assert!(message.contains("stale-frist")),
        other => panic!("Expected Config error, got {other:?}"),
    }
}

/// **VALUE**: Verifies the default config is a quiet, well-behaved helper.
///
/// **BUG THIS CATCHES**: Would catch a default that writes logs into the working
/// directory or misbehaves on purpose.
#[test]
fn given_default_config_when_created_then_normal_without_files() {
    let config = HelperConfig::default();

    assert_eq!(config.mode, Mode::Normal);
    assert!(config.request_log.is_none());
    assert!(config.marker.is_none());
    assert!(config.log_dir.is_none());
    assert!(config.fd_report.is_none());
}
