use lock_client::LockClientConfig;
use lock_client::error::CoreError;
use lock_client::error::config::ConfigError;

use common::ErrorLocation;

use std::error::Error;
use std::fs;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::panic::Location;
use std::path::PathBuf;

use tempfile::tempdir;

/// **VALUE**: Verifies that `ReadError` names the file and keeps the I/O error as source.
///
/// **WHY THIS MATTERS**: An unreadable config must tell the user which file and why.
///
/// **BUG THIS CATCHES**: Would catch dropping `#[source]` or the path from the message.
#[test]
fn given_read_error_when_formatted_then_includes_path_and_source() {
    // GIVEN: A ReadError for a specific file
    let err = ConfigError::ReadError {
        location: ErrorLocation::from(Location::caller()),
        path: PathBuf::from("/etc/lock-client/lock-client.toml"),
        source: IoError::new(ErrorKind::PermissionDenied, "access denied"),
    };

    // WHEN: Formatting
    let error_string = format!("{}", err);

    // THEN: Kind, path, OS text, and location are all present
    assert!(error_string.contains("Config Read Error"));
    assert!(error_string.contains("/etc/lock-client/lock-client.toml"));
    assert!(error_string.contains("access denied"));
    assert!(error_string.contains("config.rs"));
    assert!(err.source().is_some());
}

/// **VALUE**: Verifies that validation failures from a real file carry a reason.
///
/// **WHY THIS MATTERS**: "invalid config" without the offending key sends users hunting.
///
/// **BUG THIS CATCHES**: Would catch `load()` skipping validation for file-based config.
#[test]
fn given_out_of_range_file_when_loaded_then_validation_error_names_key() {
    // GIVEN: A config file with an absurd retry budget
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("lock-client.toml"), "max_retries = 500\n").unwrap();

    // WHEN: Loading
    let err = LockClientConfig::load(dir.path()).unwrap_err();

    // THEN: ValidationError mentioning the key
    match &err {
        ConfigError::ValidationError { reason, .. } => {
            assert!(reason.contains("max_retries"), "got {reason}");
        }
        other => panic!("Expected ValidationError, got {other:?}"),
    }

    // AND: It folds into CoreError unchanged
    let expected = err.to_string();
    let core: CoreError = err.into();
    assert_eq!(core.to_string(), expected);
}

/// **VALUE**: Verifies that a parse error includes the TOML parser's explanation.
///
/// **WHY THIS MATTERS**: The parser reports line and column; losing it makes typos hard
/// to find.
///
/// **BUG THIS CATCHES**: Would catch replacing the parser message with a fixed string.
#[test]
fn given_wrong_type_when_loaded_then_parse_error_has_reason() {
    // GIVEN: A string where a number belongs
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lock-client.toml"),
        "stale_grace_ms = \"soon\"\n",
    )
    .unwrap();

    // WHEN: Loading
    let err = LockClientConfig::load(dir.path()).unwrap_err();

    // THEN: ParseError with a non-empty reason
    match err {
        ConfigError::ParseError { reason, .. } => assert!(!reason.is_empty()),
        other => panic!("Expected ParseError, got {other:?}"),
    }
}
