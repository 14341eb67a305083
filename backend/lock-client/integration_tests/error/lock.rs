use lock_client::error::CoreError;
use lock_client::{HelperStatus, LockClientConfig, LockError, LockSession};

use common::ErrorLocation;

use std::error::Error;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::panic::Location;

/// **VALUE**: Verifies that `LockError::System` shows message, OS error and location.
///
/// **WHY THIS MATTERS**: System errors are the only report a user gets when the helper is
/// missing or the pipes break. Without the OS text they cannot tell "not installed"
/// from "permission denied".
///
/// **BUG THIS CATCHES**: Would catch dropping `{source}` from the Display format or
/// removing `#[source]`, which would break the error chain.
#[test]
fn given_system_error_when_formatted_then_includes_os_error_and_location() {
    // GIVEN: A System error wrapping PermissionDenied
    let err = LockError::System {
        message: "Failed to spawn lock helper".to_string(),
        location: ErrorLocation::from(Location::caller()),
        source: IoError::new(ErrorKind::PermissionDenied, "permission denied"),
    };

    // WHEN: Formatting and walking the chain
    let error_string = err.to_string();
    let source = err.source().map(|s| s.to_string());

    // THEN: Message, OS text, file location, and an intact source
    assert!(error_string.contains("System Error"));
    assert!(error_string.contains("Failed to spawn lock helper"));
    assert!(error_string.contains("permission denied"));
    assert!(error_string.contains("lock.rs"));
    assert_eq!(source.as_deref(), Some("permission denied"));
}

/// **VALUE**: Verifies that helper-reported failures expose the status they carried.
///
/// **WHY THIS MATTERS**: Callers treat `Invalid` (bad request) differently from `System`
/// (mailbox busy, disk trouble), so the status must be reachable without parsing text.
///
/// **BUG THIS CATCHES**: Would catch `helper_status()` returning `None` for Helper errors.
#[test]
fn given_helper_error_when_inspected_then_status_is_exposed() {
    // GIVEN: A Helper error with status System
    let err = LockError::Helper {
        status: HelperStatus::System,
        message: "Could not lock '/var/mail/dave'".to_string(),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Inspecting
    // THEN: Status is available and rendered
    assert_eq!(err.helper_status(), Some(HelperStatus::System));
    assert!(!err.is_protocol());
    assert!(err.to_string().contains("system error"));
}

/// **VALUE**: Verifies that lock errors fold into the crate-wide `CoreError`.
///
/// **WHY THIS MATTERS**: Callers that load config and lock in one function use `?` on
/// both; the conversion has to exist and keep the original text.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[from]` or a non-transparent wrapper
/// that changes the message.
#[test]
fn given_lock_error_when_converted_to_core_error_then_message_is_preserved() {
    // GIVEN: A protocol error
    let err = LockError::Protocol {
        message: "bad magic".to_string(),
        location: ErrorLocation::from(Location::caller()),
    };
    let expected = err.to_string();

    // WHEN: Converting
    let core: CoreError = err.into();

    // THEN: Same text
    assert_eq!(core.to_string(), expected);
}

/// **VALUE**: Verifies that errors returned by the public API point at the caller.
///
/// **WHY THIS MATTERS**: `#[track_caller]` on `lock()` makes the location in the message
/// the line of application code that asked for the lock.
///
/// **BUG THIS CATCHES**: Would catch `#[track_caller]` being dropped somewhere between
/// `LockSession::lock` and the spawn failure.
#[test]
fn given_spawn_failure_when_lock_called_then_location_is_this_file() {
    // GIVEN: A session with a missing helper
    let session =
        LockSession::new(LockClientConfig::default().with_helper_path("/nonexistent/helper"));

    // WHEN: Locking
    let err = session.lock("/var/mail/erin").unwrap_err();

    // THEN: The location names this test file
    match err {
        LockError::System { location, .. } => {
            assert!(location.file.ends_with("lock.rs"), "got {}", location.file);
            assert!(location.file.contains("integration_tests"));
        }
        other => panic!("Expected System error, got {other:?}"),
    }
}
