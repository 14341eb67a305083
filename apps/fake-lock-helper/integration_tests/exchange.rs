// End-to-end request/response exchanges against the fake helper

use crate::helpers::{FakeHelperInstall, Logged, assert_strictly_increasing};

use lock_client::{HelperStatus, LockError};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;

/// **VALUE**: Verifies a full lock/unlock round trip and that the path reaches the helper
/// byte for byte.
///
/// **WHY THIS MATTERS**: This is the everyday path for every mailbox open.
///
/// **BUG THIS CATCHES**: Would catch a truncated or terminated path payload, or a lock
/// id not passed back unchanged on unlock.
#[test]
#[serial]
fn given_normal_helper_when_lock_then_unlock_then_path_and_id_round_trip() {
    // GIVEN: A well-behaved helper
    let install = FakeHelperInstall::new("normal");
    let session = install.session();

    // WHEN: Locking, unlocking, and locking again
    let lock_id = session.lock("/var/mail/alice").unwrap();
    session.unlock(lock_id).unwrap();
    let again = session.lock("/var/mail/alice").unwrap();

    // THEN: The helper saw the exact path and the id it handed out
    assert_ne!(lock_id, again);
    let log = install.log();
    assert_eq!(
        log[0],
        Logged::Request {
            sequence: 0,
            command: "lock".to_string(),
            argument: "/var/mail/alice".to_string(),
        }
    );
    assert_eq!(
        log[1],
        Logged::Request {
            sequence: 1,
            command: "unlock".to_string(),
            argument: "1".to_string(),
        }
    );
    assert!(install.violations().is_empty());
}

/// **VALUE**: Verifies sequence numbers keep increasing across successes and refusals.
///
/// **WHY THIS MATTERS**: A refused request still consumed its number. Reusing it would
/// make the next response look like an answer to the wrong request.
///
/// **BUG THIS CATCHES**: Would catch rolling the counter back after a failed call.
#[test]
#[serial]
fn given_mixed_outcomes_when_requests_sent_then_sequences_strictly_increase() {
    // GIVEN: A normal helper
    let install = FakeHelperInstall::new("normal");
    let session = install.session();

    // WHEN: Success, refusal (already held), success, refusal (unknown id), success
    let held = session.lock("/var/mail/bob").unwrap();
    let refused = session.lock("/var/mail/bob").unwrap_err();
    session.unlock(held).unwrap();
    let rejected = session.unlock(held).unwrap_err();
    session.lock("/var/mail/bob").unwrap();

    // THEN: Refusals surface the helper's status
    assert_eq!(refused.helper_status(), Some(HelperStatus::System));
    assert!(refused.to_string().contains("/var/mail/bob"));
    assert_eq!(rejected.helper_status(), Some(HelperStatus::Invalid));

    // AND: Five requests, five distinct increasing numbers
    let sequences = install.sequences();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert!(install.violations().is_empty());
}

/// **VALUE**: Verifies a stale response is skipped and the real answer used.
///
/// **WHY THIS MATTERS**: After a timeout or retry the helper's late answer to the old
/// request is still in the pipe. The client must read past it.
///
/// **BUG THIS CATCHES**: Would catch treating the stale response as the answer (wrong
/// lock id) or as an error.
#[test]
#[serial]
fn given_stale_reply_before_real_one_when_locking_then_stale_is_discarded() {
    // GIVEN: A helper that sends a stale reply ahead of every answer after the first
    let install = FakeHelperInstall::new("stale-first");
    let session = install.session();

    // WHEN: Locking two paths and unlocking one
    let first = session.lock("/var/mail/a").unwrap();
    let second = session.lock("/var/mail/b").unwrap();
    session.unlock(second).unwrap();

    // THEN: Correct ids, no resends
    assert_ne!(first, second);
    assert_eq!(second.to_string(), "#2");
    assert_eq!(install.sequences(), vec![0, 1, 2]);
}

/// **VALUE**: Verifies the retry bound: one attempt plus three retries, each under a
/// new sequence number, then a protocol error.
///
/// **WHY THIS MATTERS**: A helper stuck replaying an old sequence would otherwise make
/// the client retry forever.
///
/// **BUG THIS CATCHES**: Would catch an off-by-one in the retry loop, or resending
/// under the same sequence number.
#[test]
#[serial]
fn given_helper_stuck_on_old_sequence_when_locking_then_gives_up_after_three_retries() {
    // GIVEN: A helper that answers its first request, then repeats that sequence forever
    let install = FakeHelperInstall::new("always-stale");
    let session = install.session();
    session.lock("/var/mail/first").unwrap();

    // WHEN: Locking again
    let err = session.lock("/var/mail/second").unwrap_err();

    // THEN: Protocol error after exactly four attempts
    assert!(err.is_protocol(), "Expected Protocol error, got {err:?}");
    assert!(err.to_string().contains("4 attempts"));
    assert_eq!(install.sequences(), vec![0, 1, 2, 3, 4]);
    assert!(install.violations().is_empty());

    // AND: The helper is still in use
    assert!(session.helper_pid().is_some());
}

/// **VALUE**: Verifies that a late answer to an earlier attempt of the same call is
/// accepted as the call's answer.
///
/// **WHY THIS MATTERS**: After a resend the helper may still answer the first request.
/// The lock it grants there is the caller's lock; dropping the answer leaves the
/// mailbox locked with nobody holding the id, and the resend is then refused.
///
/// **BUG THIS CATCHES**: Would catch only accepting the latest attempt's sequence,
/// which discards the grant and turns a successful lock into a refusal.
#[test]
#[serial]
fn given_answer_to_earlier_attempt_when_locking_then_call_uses_it() {
    // GIVEN: A helper that, after its first request, replies stale at once and answers
    // late, so the client resends before the real answer arrives
    let install = FakeHelperInstall::new("late-answer");
    let session = install.session();
    session.lock("/var/mail/first").unwrap();

    // WHEN: Locking a second path
    let second = session.lock("/var/mail/second");

    // THEN: The first attempt's grant is the result
    let second = second.unwrap();
    assert_eq!(second.to_string(), "#2");

    // AND: A resend did go out, and the helper saw nothing out of order
    session.shutdown();
    assert_eq!(install.sequences(), vec![0, 1, 2]);
    assert!(install.violations().is_empty());
    assert_eq!(install.log().last(), Some(&Logged::Eof));
}

/// **VALUE**: Verifies a lock granted after its caller gave up is released again.
///
/// **WHY THIS MATTERS**: A timed-out lock call may still be granted by the helper. Nobody
/// holds that id, so without a release the mailbox stays locked until the helper exits.
///
/// **BUG THIS CATCHES**: Would catch discarding the late grant as stale and forgetting
/// it, which makes every later lock of the same mailbox fail.
#[test]
#[serial]
fn given_lock_granted_after_timeout_when_next_call_runs_then_orphaned_lock_is_released() {
    // GIVEN: A helper that answers its first request late, and a deadline shorter than that
    let install = FakeHelperInstall::new("slow-first");
    let session = lock_client::LockSession::new(
        install
            .config()
            .with_response_timeout(Some(Duration::from_millis(250))),
    );

    // WHEN: The first lock times out and another lock follows
    let abandoned = session.lock("/var/mail/late");
    let other = session.lock("/var/mail/other");

    // THEN: Timeout, then a normal grant
    assert!(
        matches!(abandoned, Err(LockError::Timeout { .. })),
        "Expected Timeout, got {abandoned:?}"
    );
    assert_eq!(other.unwrap().to_string(), "#2");

    // AND: The late grant (#1) was unlocked, so the mailbox can be locked again
    session.lock("/var/mail/late").unwrap();
    let log = install.log();
    assert_eq!(
        log[2],
        Logged::Request {
            sequence: 2,
            command: "unlock".to_string(),
            argument: "1".to_string(),
        }
    );
    assert_strictly_increasing(&install.sequences());
    assert!(install.violations().is_empty());
}

/// **VALUE**: Verifies a helper that never answers trips the response deadline.
///
/// **WHY THIS MATTERS**: Without a deadline a wedged helper blocks the mail client
/// forever.
///
/// **BUG THIS CATCHES**: Would catch the timeout being ignored or killing the helper.
#[test]
#[serial]
fn given_silent_helper_when_timeout_configured_then_times_out() {
    // GIVEN: A hanging helper and a 200ms deadline
    let install = FakeHelperInstall::new("hang");
    let session = lock_client::LockSession::new(
        install
            .config()
            .with_response_timeout(Some(Duration::from_millis(200))),
    );

    // WHEN: Locking
    let started = Instant::now();
    let err = session.lock("/var/mail/slow").unwrap_err();

    // THEN: Timeout after roughly the deadline, helper kept
    assert!(
        matches!(err, LockError::Timeout { .. }),
        "Expected Timeout, got {err:?}"
    );
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(session.helper_pid().is_some());
}

/// **VALUE**: Verifies replies with a bad magic or a future sequence are protocol errors.
///
/// **WHY THIS MATTERS**: Both mean the client is not talking to a helper that speaks
/// this protocol; retrying would not help.
///
/// **BUG THIS CATCHES**: Would catch a future sequence being discarded like a stale one.
#[test]
#[serial]
fn given_corrupt_replies_when_locking_then_protocol_errors() {
    // GIVEN: One helper with bad magic, one answering ahead
    let bad_magic = FakeHelperInstall::new("bad-magic");
    let future = FakeHelperInstall::new("future-sequence");

    // WHEN: Locking through each
    let magic_err = bad_magic.session().lock("/var/mail/x").unwrap_err();
    let future_err = future.session().lock("/var/mail/x").unwrap_err();

    // THEN: Protocol errors naming the problem, with no resend
    assert!(magic_err.is_protocol());
    assert!(magic_err.to_string().contains("bad magic"));
    assert!(future_err.is_protocol());
    assert!(future_err.to_string().contains("ahead"));
    assert_eq!(future.sequences(), vec![0]);
}

/// **VALUE**: Verifies concurrent callers are serialized with unique, increasing
/// sequence numbers.
///
/// **WHY THIS MATTERS**: Interleaved writes from two threads would corrupt the request
/// stream; a shared number would confuse responses.
///
/// **BUG THIS CATCHES**: Would catch assigning sequence numbers outside the session lock.
#[test]
#[serial]
fn given_concurrent_callers_when_locking_then_requests_never_interleave() {
    // GIVEN: One session shared by four threads
    let install = FakeHelperInstall::new("normal");
    let session = Arc::new(install.session());

    // WHEN: Each thread locks and unlocks its own mailbox five times
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for _ in 0..5 {
                    let lock_id = session.lock(format!("/var/mail/user{worker}")).unwrap();
                    session.unlock(lock_id).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // THEN: 40 requests, all numbers unique and increasing, helper never confused
    let sequences = install.sequences();
    assert_eq!(sequences.len(), 40);
    assert_strictly_increasing(&sequences);
    assert!(install.violations().is_empty());
}
