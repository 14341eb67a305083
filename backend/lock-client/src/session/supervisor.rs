//! Lifecycle of the lock helper child process.
//!
//! The helper is spawned with its stdin connected to the request pipe and its
//! stdout connected to the response pipe. Our ends of both pipes are kept
//! close-on-exec so no other child of this process ever inherits them, and the
//! helper itself starts with nothing open beyond its three standard descriptors.

use crate::error::lock::LockError;
use crate::protocol::{Record, read_response, wait_readable, write_exactly};

use std::io::{Error as IoError, ErrorKind};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

/// Exit status the helper reports when its own executable could not be run.
pub(crate) const EXEC_FAILED_STATUS: i32 = 255;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// First descriptor after stdin, stdout and stderr.
const FIRST_INHERITED_FD: libc::c_int = 3;

/// Upper bound for the descriptor sweep when the limit cannot be queried.
const FALLBACK_OPEN_MAX: libc::c_int = 1024;

#[cfg(target_os = "linux")]
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// A running helper together with both of our pipe ends.
///
/// The pipes live and die with the process handle, so there is never a
/// session holding one without the others.
pub(crate) struct HelperProcess {
    child: Child,
    requests: Option<ChildStdin>,
    responses: ChildStdout,
}

impl HelperProcess {
    #[track_caller]
    pub(crate) fn spawn(helper_path: &Path) -> Result<Self, LockError> {
        debug!("Spawning lock helper {}", helper_path.display());

        let mut command = Command::new(helper_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // SAFETY: the hook runs in the forked child before exec and only makes
        // async-signal-safe calls. Descriptors are flagged close-on-exec rather than
        // closed, so the channel std uses to report exec failure keeps working.
        unsafe {
            command.pre_exec(|| {
                cloexec_inherited_fds();
                Ok(())
            });
        }

        let spawned = command.spawn();

        // No closure here: the error location must stay the caller's.
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return Err(LockError::system(
                    format!("Failed to spawn lock helper {}", helper_path.display()),
                    e,
                ));
            }
        };

        let (Some(requests), Some(responses)) = (child.stdin.take(), child.stdout.take()) else {
            terminate(&mut child);
            return Err(LockError::system(
                "Lock helper started without its pipes",
                IoError::new(ErrorKind::BrokenPipe, "missing stdio pipe"),
            ));
        };

        if let Err(e) = set_cloexec(&requests).and_then(|()| set_cloexec(&responses)) {
            terminate(&mut child);
            return Err(LockError::system(
                "Failed to mark lock helper pipes close-on-exec",
                e,
            ));
        }

        info!(
            "Spawned lock helper {} (PID: {})",
            helper_path.display(),
            child.id()
        );

        Ok(Self {
            child,
            requests: Some(requests),
            responses,
        })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }

    pub(crate) fn send(&mut self, request: &[u8]) -> Result<(), IoError> {
        let requests = self.requests.as_mut().ok_or_else(|| {
            IoError::new(ErrorKind::BrokenPipe, "request pipe already closed")
        })?;
        trace!("Writing {} byte request to lock helper", request.len());
        write_exactly(requests, request)
    }

    /// Wait for response bytes. `Ok(false)` means the timeout expired.
    pub(crate) fn wait_response(&self, timeout: Option<Duration>) -> Result<bool, IoError> {
        wait_readable(&self.responses, timeout)
    }

    /// Read one response header, `Ok(None)` once the helper closed its end.
    pub(crate) fn receive(&mut self) -> Result<Option<Record>, IoError> {
        read_response(&mut self.responses)
    }

    /// Find out what happened to a helper that stopped talking to us.
    ///
    /// A helper that has closed its response pipe is unusable even if it is still
    /// running, so it is killed and reaped before returning.
    pub(crate) fn describe_exit(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => match status.code() {
                Some(EXEC_FAILED_STATUS) => "could not be executed".to_string(),
                Some(code) => format!("exited with status {code}"),
                None => format!("was terminated ({status})"),
            },
            Ok(None) => {
                warn!(
                    "Lock helper (PID: {}) closed its pipe but is still running, killing it",
                    self.child.id()
                );
                terminate(&mut self.child);
                "closed its pipe".to_string()
            }
            Err(e) => format!("could not be waited on: {e}"),
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        // EOF on stdin tells the helper to exit.
        drop(self.requests.take());

        let started = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Lock helper (PID: {}) exited: {status}", self.child.id());
                    return;
                }
                Ok(None) if started.elapsed() < SHUTDOWN_GRACE => sleep(SHUTDOWN_POLL_INTERVAL),
                Ok(None) | Err(_) => break,
            }
        }

        warn!(
            "Lock helper (PID: {}) did not exit after its pipe closed, killing it",
            self.child.id()
        );
        terminate(&mut self.child);
    }
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn set_cloexec<F: AsFd>(fd: &F) -> Result<(), IoError> {
    let raw_fd = fd.as_fd().as_raw_fd();

    // SAFETY: `raw_fd` is an open descriptor borrowed from `fd`; F_GETFD/F_SETFD only
    // touch its descriptor flags.
    let flags = unsafe { libc::fcntl(raw_fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(IoError::last_os_error());
    }
    if flags & libc::FD_CLOEXEC != 0 {
        return Ok(());
    }

    // SAFETY: as above.
    if unsafe { libc::fcntl(raw_fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(IoError::last_os_error());
    }
    Ok(())
}

/// Flag every descriptor above stderr close-on-exec. Runs between fork and exec.
fn cloexec_inherited_fds() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: close_range only changes descriptor flags; it reports ENOSYS or EINVAL
        // on kernels older than 5.11, which falls through to the sweep below.
        let done = unsafe {
            libc::syscall(
                libc::SYS_close_range,
                FIRST_INHERITED_FD as libc::c_uint,
                libc::c_uint::MAX,
                CLOSE_RANGE_CLOEXEC,
            )
        };
        if done == 0 {
            return;
        }
    }

    // SAFETY: sysconf has no preconditions.
    let open_max = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
        limit if limit > 0 => libc::c_int::try_from(limit).unwrap_or(libc::c_int::MAX),
        _ => FALLBACK_OPEN_MAX,
    };

    for fd in FIRST_INHERITED_FD..open_max {
        // SAFETY: F_GETFD on a closed descriptor fails with EBADF and changes nothing;
        // F_SETFD only touches the flags of a descriptor that is open.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }
}
