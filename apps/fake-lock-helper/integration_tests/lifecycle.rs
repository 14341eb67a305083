// Helper process lifecycle: crashes, failed launches, guards and shutdown

use crate::helpers::{FakeHelperInstall, Logged};

use lock_client::{LockClientConfig, LockError, LockSession};

use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::tempdir;

/// **VALUE**: Verifies that a helper dying mid-request is reported and that the next
/// call starts a fresh helper that works.
///
/// **WHY THIS MATTERS**: Helpers crash. The mail client must recover on the next
/// operation without restarting.
///
/// **BUG THIS CATCHES**: Would catch keeping the dead helper's pipes, or reusing the
/// sequence number of the request that was lost.
#[test]
#[serial]
fn given_helper_dies_on_first_request_when_locking_again_then_new_helper_serves() {
    // GIVEN: A helper that dies on its first request, once
    let install = FakeHelperInstall::new("die-once");
    let session = install.session();

    // WHEN: Locking twice
    let first = session.lock("/var/mail/dave");
    let dead_pid = session.helper_pid();
    let second = session.lock("/var/mail/dave");

    // THEN: First reports the death and leaves no helper behind
    match first {
        Err(LockError::HelperDied { message, .. }) => {
            assert!(message.contains("lock '/var/mail/dave'"), "got {message}");
        }
        other => panic!("Expected HelperDied, got {other:?}"),
    }
    assert_eq!(dead_pid, None);

    // AND: Second succeeds with a new helper and the next sequence number
    assert!(second.is_ok(), "Expected lock, got {second:?}");
    assert!(session.helper_pid().is_some());
    assert_eq!(install.sequences(), vec![0, 1]);
}

/// **VALUE**: Verifies that a helper that cannot be executed is a system error that
/// keeps the OS reason.
///
/// **WHY THIS MATTERS**: A broken install (wrong permissions) must be distinguishable
/// from a helper that crashed.
///
/// **BUG THIS CATCHES**: Would catch reporting exec failure as `HelperDied`, or caching
/// the failure so a fixed install is never retried.
#[test]
#[serial]
fn given_unexecutable_helper_when_locking_then_system_error_until_fixed() {
    // GIVEN: A helper file without execute permission
    let install = FakeHelperInstall::new("normal");
    fs::set_permissions(install.path(), fs::Permissions::from_mode(0o644)).unwrap();
    let session = install.session();

    // WHEN: Locking
    let err = session.lock("/var/mail/erin").unwrap_err();

    // THEN: System error with the permission problem, no helper recorded
    match &err {
        LockError::System { source, .. } => assert_eq!(source.kind(), ErrorKind::PermissionDenied),
        other => panic!("Expected System error, got {other:?}"),
    }
    assert!(err.to_string().contains(&install.path().display().to_string()));
    assert_eq!(session.helper_pid(), None);

    // WHEN: The install is fixed
    fs::set_permissions(install.path(), fs::Permissions::from_mode(0o755)).unwrap();

    // THEN: The same session recovers
    assert!(session.lock("/var/mail/erin").is_ok());
}

/// **VALUE**: Verifies a missing helper binary is reported as not found.
#[test]
#[serial]
fn given_missing_helper_when_locking_then_not_found() {
    let dir = tempdir().unwrap();
    let session = LockSession::new(
        LockClientConfig::default().with_helper_path(dir.path().join("camel-lock-helper-1.2")),
    );

    let err = session.lock("/var/mail/frank").unwrap_err();

    match err {
        LockError::System { source, .. } => assert_eq!(source.kind(), ErrorKind::NotFound),
        other => panic!("Expected System error, got {other:?}"),
    }
}

/// **VALUE**: Verifies `HeldLock` releases on drop and `release()` reports the outcome.
///
/// **WHY THIS MATTERS**: Early returns in mail code must not leave mailboxes locked.
///
/// **BUG THIS CATCHES**: Would catch the drop path skipping the unlock, or `release()`
/// unlocking twice (once explicitly, once on drop).
#[test]
#[serial]
fn given_held_lock_when_dropped_or_released_then_helper_unlocks_once() {
    // GIVEN: A normal helper
    let install = FakeHelperInstall::new("normal");
    let session = install.session();

    // WHEN: Acquiring and dropping, then acquiring and releasing
    {
        let guard = session.acquire("/var/mail/grace").unwrap();
        assert_eq!(guard.path().to_str(), Some("/var/mail/grace"));
    }
    let guard = session.acquire("/var/mail/grace").unwrap();
    guard.release().unwrap();

    // THEN: lock, unlock, lock, unlock, and nothing more
    let commands: Vec<_> = install
        .log()
        .into_iter()
        .filter_map(|entry| match entry {
            Logged::Request { command, .. } => Some(command),
            _ => None,
        })
        .collect();
    assert_eq!(commands, vec!["lock", "unlock", "lock", "unlock"]);
}

/// **VALUE**: Verifies shutdown closes the pipes, lets the helper exit, and that a
/// later lock starts a new helper.
///
/// **WHY THIS MATTERS**: Leaked helpers keep mailbox locks alive after the client is
/// done with them.
///
/// **BUG THIS CATCHES**: Would catch shutdown killing the helper before it saw EOF, or
/// leaving the old handle in place.
#[test]
#[serial]
fn given_running_helper_when_shutdown_then_helper_exits_and_next_lock_respawns() {
    // GIVEN: A helper holding a lock
    let install = FakeHelperInstall::new("normal");
    let session = install.session();
    session.lock("/var/mail/heidi").unwrap();
    let first_pid = session.helper_pid().unwrap();

    // WHEN: Shutting down
    session.shutdown();

    // THEN: No helper, and the helper saw EOF before exiting
    assert_eq!(session.helper_pid(), None);
    assert_eq!(install.log().last(), Some(&Logged::Eof));

    // WHEN: Locking again
    session.lock("/var/mail/heidi").unwrap();

    // THEN: A new process, sequence numbers still increasing
    assert_ne!(session.helper_pid(), Some(first_pid));
    assert_eq!(install.sequences(), vec![0, 1]);
}

/// **VALUE**: Verifies unlock after the helper died is rejected without respawning.
///
/// **WHY THIS MATTERS**: The lock died with the helper; a new helper cannot release it.
///
/// **BUG THIS CATCHES**: Would catch unlock spawning a helper to send a meaningless id.
#[test]
#[serial]
fn given_lock_from_dead_helper_when_unlocking_then_not_running() {
    // GIVEN: A lock granted by a helper that is then shut down
    let install = FakeHelperInstall::new("normal");
    let session = install.session();
    let lock_id = session.lock("/var/mail/ivan").unwrap();
    session.shutdown();

    // WHEN: Unlocking
    let result = session.unlock(lock_id);

    // THEN: NotRunning, no new helper
    assert!(
        matches!(result, Err(LockError::NotRunning { .. })),
        "Expected NotRunning, got {result:?}"
    );
    assert_eq!(session.helper_pid(), None);
}

/// **VALUE**: Verifies a lock id from a previous helper is rejected even after a new
/// helper has started.
///
/// **WHY THIS MATTERS**: A respawned helper numbers its locks from the beginning again,
/// so an old id can name a lock that now belongs to a different caller.
///
/// **BUG THIS CATCHES**: Would catch sending the old id to the new helper, which would
/// release someone else's mailbox lock.
#[test]
#[serial]
fn given_lock_from_previous_helper_when_unlocking_after_respawn_then_not_running() {
    // GIVEN: One lock from a helper that is then shut down, and one from its replacement
    let install = FakeHelperInstall::new("normal");
    let session = install.session();
    let old = session.lock("/var/mail/judy").unwrap();
    session.shutdown();
    let current = session.lock("/var/mail/ken").unwrap();

    // Both helpers handed out the same number
    assert_eq!(old.to_string(), current.to_string());
    assert_ne!(old, current);

    // WHEN: Unlocking the old id
    let result = session.unlock(old);

    // THEN: NotRunning, and nothing reached the new helper
    assert!(
        matches!(result, Err(LockError::NotRunning { .. })),
        "Expected NotRunning, got {result:?}"
    );
    assert_eq!(install.sequences(), vec![0, 1]);

    // AND: The current lock is untouched and still releasable
    session.unlock(current).unwrap();
    assert_eq!(install.sequences(), vec![0, 1, 2]);
}

/// **VALUE**: Verifies descriptors the client process has open are not inherited by
/// the helper.
///
/// **WHY THIS MATTERS**: The helper runs with elevated rights. A mailbox, socket or
/// pipe that leaks into it stays open as long as the helper lives.
///
/// **BUG THIS CATCHES**: Would catch spawning the helper without sweeping descriptors
/// above stderr, which passes on anything opened without close-on-exec.
#[test]
#[serial]
fn given_inheritable_descriptor_when_helper_spawned_then_helper_does_not_receive_it() {
    // GIVEN: A descriptor in the client process without close-on-exec
    let install = FakeHelperInstall::new("normal");
    let file = File::open(install.path()).unwrap();
    // SAFETY: `file` is open for the duration of the call; F_DUPFD returns a new
    // descriptor that does not carry FD_CLOEXEC.
    let raw = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_DUPFD, 200) };
    assert!(raw >= 200, "F_DUPFD failed");
    // SAFETY: `raw` was just returned by F_DUPFD and is owned by nobody else.
    let inheritable = unsafe { OwnedFd::from_raw_fd(raw) };

    // WHEN: The helper is started
    let session = install.session();
    session.lock("/var/mail/leo").unwrap();

    // THEN: It has its standard descriptors but not the inheritable one
    let descriptors = install.descriptors();
    for standard in [0, 1, 2] {
        assert!(descriptors.contains(&standard), "missing {standard} in {descriptors:?}");
    }
    assert!(
        !descriptors.contains(&inheritable.as_raw_fd()),
        "helper inherited {} ({descriptors:?})",
        inheritable.as_raw_fd()
    );
}

/// **VALUE**: Verifies shutdown does not block other callers while the helper takes its
/// time to exit.
///
/// **WHY THIS MATTERS**: Reaping a slow helper can take the whole shutdown grace
/// period. Every other thread of the mail client would stall for that long.
///
/// **BUG THIS CATCHES**: Would catch dropping the helper while the session mutex is
/// still held.
#[test]
#[serial]
fn given_helper_slow_to_exit_when_shutting_down_then_session_is_not_blocked() {
    // GIVEN: A helper that lingers after its request pipe closes
    let install = FakeHelperInstall::new("linger");
    let session = Arc::new(install.session());
    session.lock("/var/mail/mallory").unwrap();

    // WHEN: Shutting down on another thread
    let shutting_down = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let started = Instant::now();
            session.shutdown();
            started.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(50));

    // THEN: The session answers at once and has no helper
    let started = Instant::now();
    let pid = session.helper_pid();
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "helper_pid() waited {:?}",
        started.elapsed()
    );
    assert_eq!(pid, None);

    // AND: Shutdown itself still waited for the helper before killing it
    let shutdown_took = shutting_down.join().unwrap();
    assert!(shutdown_took >= Duration::from_millis(400), "took {shutdown_took:?}");
}
