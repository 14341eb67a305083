//! Lock session: the helper connection plus the lock and unlock operations.
//!
//! A [`LockSession`] owns at most one helper process. The helper is spawned on the
//! first [`LockSession::lock`] and respawned on the next call after it dies.
//!
//! # Exchanges
//!
//! Every request carries a fresh sequence number and every valid response echoes
//! one. A call that has sent requests `first..=n` accepts a response as follows:
//!
//! - a response numbered `first..=n` answers this call, whichever attempt it belongs to
//! - a response below `first` is stale and dropped
//! - a response above `n`, or with the wrong magic, is a protocol error
//! - a stale response not followed by an answer within the stale grace window
//!   counts as a desynchronized attempt; the request is resent under a new number
//!   until the retry budget runs out
//!
//! Lock requests that never got their answer are remembered. If the helper later
//! grants one of them, the lock is released again right away.
//!
//! The whole exchange runs under the session mutex, so concurrent callers are
//! served one at a time.

mod guard;
mod supervisor;

pub use guard::HeldLock;

use crate::config::LockClientConfig;
use crate::error::lock::LockError;
use crate::protocol::{Command, HelperStatus, LockId, RESPONSE_MAGIC, Record, encode_request};

use supervisor::HelperProcess;

use common::ErrorLocation;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::panic::Location;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use log::{debug, info, warn};

static SHARED_SESSION: OnceLock<LockSession> = OnceLock::new();

/// Client side of the lock helper protocol.
///
/// # Thread Safety
///
/// `LockSession` is `Sync`; share it by reference or in an `Arc`. All helper
/// traffic is serialized by an internal mutex.
pub struct LockSession {
    config: LockClientConfig,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    helper: Option<HelperProcess>,
    sequence: u32,
    /// Bumped on every spawn; stamped into each granted [`LockId`].
    generation: u32,
    /// Sequence numbers of lock requests whose answer never reached a caller.
    abandoned_locks: HashSet<u32>,
    /// Locks the helper granted to abandoned requests, waiting to be released.
    orphaned_locks: Vec<u32>,
}

enum Attempt {
    Answered(Record),
    Desynchronized,
}

impl SessionState {
    #[track_caller]
    fn ensure_helper(&mut self, config: &LockClientConfig) -> Result<(), LockError> {
        if self.helper.is_none() {
            self.helper = Some(HelperProcess::spawn(&config.helper_path)?);
            self.generation = self.generation.wrapping_add(1);
        }
        Ok(())
    }

    #[track_caller]
    fn running_helper(&mut self) -> Result<&mut HelperProcess, LockError> {
        self.helper
            .as_mut()
            .ok_or_else(|| LockError::helper_died("Lock helper is not running"))
    }

    /// Hand out the next sequence number. One number per attempt.
    fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Forget the helper along with everything only it could answer.
    fn detach_helper(&mut self) -> Option<HelperProcess> {
        self.abandoned_locks.clear();
        self.orphaned_locks.clear();
        self.helper.take()
    }

    /// Drop a helper that stopped answering and say why.
    ///
    /// `describe_exit` reaps the child, so dropping it here does not wait.
    fn reset_helper(&mut self) -> String {
        match self.detach_helper() {
            Some(mut helper) => {
                let reason = helper.describe_exit();
                warn!("Lock helper (PID: {}) {reason}", helper.pid());
                reason
            }
            None => "is not running".to_string(),
        }
    }

    /// Remember the lock requests of a finished call that went unanswered.
    fn abandon(&mut self, command: Command, first: u32, last: u32, answered: Option<u32>) {
        if command != Command::Lock || self.helper.is_none() {
            return;
        }

        let mut sequence = first;
        loop {
            if answered != Some(sequence) {
                self.abandoned_locks.insert(sequence);
            }
            if sequence == last {
                break;
            }
            sequence = sequence.wrapping_add(1);
        }
    }
}

impl LockSession {
    /// Create a session. No helper is started until the first lock request.
    pub fn new(config: LockClientConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// The process-wide session, configured from the user's `lock-client.toml`.
    pub fn shared() -> &'static LockSession {
        SHARED_SESSION.get_or_init(|| {
            let config = LockClientConfig::load_default().unwrap_or_else(|e| {
                warn!("Using default lock-client config: {e}");
                LockClientConfig::default()
            });
            LockSession::new(config)
        })
    }

    pub fn config(&self) -> &LockClientConfig {
        &self.config
    }

    /// PID of the running helper, if there is one.
    pub fn helper_pid(&self) -> Option<u32> {
        self.state().helper.as_ref().map(HelperProcess::pid)
    }

    /// Start the helper unless one is already running.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::System`] if the helper could not be spawned. The session
    /// stays empty and the next call tries again.
    #[track_caller]
    pub fn ensure_helper(&self) -> Result<(), LockError> {
        self.state().ensure_helper(&self.config)
    }

    /// Acquire a lock on `path` through the helper.
    ///
    /// # Returns
    ///
    /// * `Ok(LockId)` - The helper holds the lock; pass the id to [`LockSession::unlock`]
    /// * `Err(LockError)` - The helper refused, died, or the exchange failed
    #[track_caller]
    pub fn lock(&self, path: impl AsRef<Path>) -> Result<LockId, LockError> {
        let path = path.as_ref();
        let path_bytes = path.as_os_str().as_bytes();
        let what = format!("lock '{}'", path.display());

        let Ok(path_len) = u32::try_from(path_bytes.len()) else {
            return Err(LockError::InvalidRequest {
                message: format!("Could not {what}: path of {} bytes is too long", path_bytes.len()),
                location: ErrorLocation::from(Location::caller()),
            });
        };

        let mut state = self.state();
        state.ensure_helper(&self.config)?;

        let result = self.exchange(&mut state, Command::Lock, &what, |sequence| {
            encode_request(&Record::lock_request(sequence, path_len), path_bytes)
        });
        let generation = state.generation;
        self.release_orphaned_locks(&mut state);
        let response = result?;

        match response.status() {
            HelperStatus::Ok => {
                let lock_id = LockId::new(response.data, generation);
                debug!("Locked {} as {lock_id}", path.display());
                Ok(lock_id)
            }
            status => Err(LockError::helper(status, format!("Could not {what}"))),
        }
    }

    /// Release a lock previously returned by [`LockSession::lock`].
    ///
    /// Never starts a helper. A lock granted by a helper that has since exited is gone
    /// with it, so its id is rejected rather than sent to the current helper.
    #[track_caller]
    pub fn unlock(&self, lock_id: LockId) -> Result<(), LockError> {
        let what = format!("unlock {lock_id}");
        let mut state = self.state();

        let refusal = if state.helper.is_none() {
            Some("lock helper is not running")
        } else if lock_id.generation() != state.generation {
            Some("the lock helper that granted it is no longer running")
        } else {
            None
        };
        if let Some(reason) = refusal {
            return Err(LockError::NotRunning {
                message: format!("Could not {what}: {reason}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let result = self.exchange(&mut state, Command::Unlock, &what, |sequence| {
            Record::unlock_request(sequence, lock_id).to_bytes().to_vec()
        });
        self.release_orphaned_locks(&mut state);
        let response = result?;

        match response.status() {
            HelperStatus::Ok => {
                debug!("Unlocked {lock_id}");
                Ok(())
            }
            status => Err(LockError::helper(status, format!("Could not {what}"))),
        }
    }

    /// Acquire a lock that is released when the returned guard is dropped.
    #[track_caller]
    pub fn acquire(&self, path: impl AsRef<Path>) -> Result<HeldLock<'_>, LockError> {
        let path = path.as_ref();
        let lock_id = self.lock(path)?;
        Ok(HeldLock::new(self, lock_id, path.to_path_buf()))
    }

    /// Close the pipes and reap the helper. A later lock starts a new one.
    pub fn shutdown(&self) {
        // Reaping can take a while; do it after the mutex is released.
        let helper = self.state().detach_helper();
        if let Some(helper) = helper {
            info!("Shutting down lock helper (PID: {})", helper.pid());
            drop(helper);
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Lock session mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Unlock whatever the helper granted to requests nobody is waiting for any more.
    fn release_orphaned_locks(&self, state: &mut SessionState) {
        while let Some(raw) = state.orphaned_locks.pop() {
            let lock_id = LockId::new(raw, state.generation);
            let what = format!("release orphaned lock {lock_id}");

            let result = self.exchange(state, Command::Unlock, &what, |sequence| {
                Record::unlock_request(sequence, lock_id).to_bytes().to_vec()
            });

            match result {
                Ok(response) if response.status() == HelperStatus::Ok => {
                    info!("Released orphaned lock {lock_id}");
                }
                Ok(response) => warn!("Could not {what}: {}", response.status()),
                Err(e) => warn!("{e}"),
            }
        }
    }

    #[track_caller]
    fn exchange(
        &self,
        state: &mut SessionState,
        command: Command,
        what: &str,
        build_request: impl Fn(u32) -> Vec<u8>,
    ) -> Result<Record, LockError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let first = state.next_sequence();
        let mut sequence = first;

        for attempt in 1..=attempts {
            if attempt > 1 {
                sequence = state.next_sequence();
                debug!("Retrying {what} with sequence {sequence} (attempt {attempt}/{attempts})");
            }

            match self.attempt(state, first, sequence, &build_request(sequence), what) {
                Ok(Attempt::Answered(record)) => {
                    state.abandon(command, first, sequence, Some(record.sequence));
                    return Ok(record);
                }
                Ok(Attempt::Desynchronized) => {
                    warn!("Lost sync with lock helper while trying to {what} (sequence {sequence})");
                }
                Err(e) => {
                    state.abandon(command, first, sequence, None);
                    return Err(e);
                }
            }
        }

        state.abandon(command, first, sequence, None);
        Err(LockError::protocol(format!(
            "Could not {what}: protocol error with lock-helper, no matching response after {attempts} attempts"
        )))
    }

    #[track_caller]
    fn attempt(
        &self,
        state: &mut SessionState,
        first: u32,
        sequence: u32,
        request: &[u8],
        what: &str,
    ) -> Result<Attempt, LockError> {
        let helper = state.running_helper()?;

        if let Err(e) = helper.send(request) {
            if e.kind() == ErrorKind::BrokenPipe {
                let reason = state.reset_helper();
                return Err(LockError::helper_died(format!(
                    "Could not {what}: lock helper {reason}"
                )));
            }
            return Err(LockError::system(
                format!("Could not {what}: failed to write to lock helper"),
                e,
            ));
        }

        let timeout = self.config.response_timeout();
        let grace = self.config.stale_grace();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut seen_stale = false;

        loop {
            let helper = state.running_helper()?;

            // After a stale reply, wait only for the grace window unless the
            // response deadline comes first.
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let (wait, within_grace) = match (seen_stale, remaining) {
                (true, Some(remaining)) if remaining <= grace => (Some(remaining), false),
                (true, _) => (Some(grace), true),
                (false, remaining) => (remaining, false),
            };

            let ready = helper.wait_response(wait).map_err(|e| {
                LockError::system(format!("Could not {what}: failed to wait for lock helper"), e)
            })?;

            if !ready {
                if within_grace {
                    return Ok(Attempt::Desynchronized);
                }
                return Err(LockError::Timeout {
                    message: format!(
                        "Could not {what}: no response from lock helper within {}ms",
                        self.config.response_timeout_ms.unwrap_or_default()
                    ),
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            let record = match helper.receive() {
                Ok(Some(record)) => record,
                Ok(None) => {
                    let reason = state.reset_helper();
                    return Err(LockError::helper_died(format!(
                        "Could not {what}: lock helper {reason}"
                    )));
                }
                Err(e) => {
                    return Err(LockError::system(
                        format!("Could not {what}: failed to read from lock helper"),
                        e,
                    ));
                }
            };

            if record.magic != RESPONSE_MAGIC {
                return Err(LockError::protocol(format!(
                    "Could not {what}: protocol error with lock-helper (bad magic {:#010x})",
                    record.magic
                )));
            }

            if record.sequence > sequence {
                return Err(LockError::protocol(format!(
                    "Could not {what}: protocol error with lock-helper (response {} is ahead of request {sequence})",
                    record.sequence
                )));
            }

            // An earlier attempt of this same call is as good an answer as the latest.
            if record.sequence >= first {
                return Ok(Attempt::Answered(record));
            }

            if state.abandoned_locks.remove(&record.sequence)
                && record.status() == HelperStatus::Ok
            {
                warn!(
                    "Lock helper granted lock #{} to abandoned request {}, releasing it",
                    record.data, record.sequence
                );
                state.orphaned_locks.push(record.data);
            }

            debug!(
                "Discarding stale lock helper response {} while waiting for {sequence}",
                record.sequence
            );
            seen_stale = true;
        }
    }
}
