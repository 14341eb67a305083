use std::io::{Error as IoError, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

/// Fill `buf` from `reader`, retrying interrupted reads.
///
/// Returns the number of bytes read. The count is short only when the peer closed
/// its end; any other failure is returned as an error.
pub fn read_exactly<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, IoError> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Write all of `buf` to `writer`, retrying interrupted and partial writes.
pub fn write_exactly<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<(), IoError> {
    let mut written = 0;

    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(IoError::new(
                    ErrorKind::WriteZero,
                    format!("peer accepted {written} of {} bytes", buf.len()),
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Wait until `fd` has data to read or its peer hung up.
///
/// `None` waits forever. Returns `Ok(false)` when the timeout expired first.
pub fn wait_readable<F: AsFd + ?Sized>(fd: &F, timeout: Option<Duration>) -> Result<bool, IoError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let raw_fd = fd.as_fd().as_raw_fd();

    loop {
        let timeout_ms: libc::c_int = match deadline {
            None => -1,
            Some(deadline) => {
                // Rounded up: a sub-millisecond remainder must not become a zero timeout.
                let remaining = deadline.saturating_duration_since(Instant::now());
                remaining
                    .as_micros()
                    .div_ceil(1000)
                    .min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut pollfd = libc::pollfd {
            fd: raw_fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pollfd` is a valid, initialized array of length 1 that outlives the call,
        // and `raw_fd` is borrowed from `fd` for the duration of this function.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

        match ready {
            n if n > 0 => return Ok(true),
            0 => return Ok(false),
            _ => {
                let err = IoError::last_os_error();
                if err.kind() != ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}
