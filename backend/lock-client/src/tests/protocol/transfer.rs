// Unit tests for the interruption-safe read/write helpers

use crate::protocol::{read_exactly, wait_readable, write_exactly};

use std::io::{Error as IoError, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// Reader that hands out at most `chunk` bytes per call and fails with
/// `Interrupted` before every successful read.
struct ChoppyReader {
    data: Vec<u8>,
    position: usize,
    chunk: usize,
    interrupt_next: bool,
}

impl Read for ChoppyReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        if self.interrupt_next {
            self.interrupt_next = false;
            return Err(IoError::from(ErrorKind::Interrupted));
        }
        self.interrupt_next = true;

        let end = (self.position + self.chunk.min(buf.len())).min(self.data.len());
        let n = end - self.position;
        buf[..n].copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(n)
    }
}

/// Writer that accepts at most `chunk` bytes per call, interrupting every other call.
struct ChoppyWriter {
    written: Vec<u8>,
    chunk: usize,
    interrupt_next: bool,
    capacity: Option<usize>,
}

impl Write for ChoppyWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        if self.interrupt_next {
            self.interrupt_next = false;
            return Err(IoError::from(ErrorKind::Interrupted));
        }
        self.interrupt_next = true;

        let room = self
            .capacity
            .map_or(usize::MAX, |cap| cap.saturating_sub(self.written.len()));
        let n = buf.len().min(self.chunk).min(room);
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

/// **VALUE**: Verifies that `read_exactly` accumulates across short and interrupted reads.
///
/// **WHY THIS MATTERS**: Pipes deliver data in whatever pieces the kernel likes, and
/// signals interrupt blocking reads. A header split across reads must still decode.
///
/// **BUG THIS CATCHES**: Would catch treating `Interrupted` as fatal or returning after
/// the first partial read.
#[test]
fn given_interrupted_partial_reads_when_read_exactly_called_then_fills_buffer() {
    // GIVEN: 16 bytes served 3 at a time with interruptions in between
    let mut reader = ChoppyReader {
        data: (0u8..16).collect(),
        position: 0,
        chunk: 3,
        interrupt_next: true,
    };
    let mut buf = [0u8; 16];

    // WHEN: Reading exactly 16 bytes
    let n = read_exactly(&mut reader, &mut buf).unwrap();

    // THEN: All bytes arrive in order
    assert_eq!(n, 16);
    assert_eq!(buf.to_vec(), (0u8..16).collect::<Vec<_>>());
}

/// **VALUE**: Verifies that a closed peer yields an honest short count, not an error.
///
/// **WHY THIS MATTERS**: The short count is the only signal that the helper died.
///
/// **BUG THIS CATCHES**: Would catch mapping EOF to `UnexpectedEof`, which would turn
/// helper death into a generic system error and skip the session reset.
#[test]
fn given_peer_closes_early_when_read_exactly_called_then_returns_short_count() {
    // GIVEN: Only 5 bytes available before EOF
    let mut reader = ChoppyReader {
        data: vec![1, 2, 3, 4, 5],
        position: 0,
        chunk: 2,
        interrupt_next: false,
    };
    let mut buf = [0u8; 16];

    // WHEN: Asking for 16
    let n = read_exactly(&mut reader, &mut buf).unwrap();

    // THEN: Reports the 5 obtained
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
}

/// **VALUE**: Verifies that `write_exactly` loops over partial and interrupted writes.
///
/// **WHY THIS MATTERS**: A lock request with a long path may not fit in one write.
/// Sending half a request desynchronizes the helper for good.
///
/// **BUG THIS CATCHES**: Would catch ignoring the count returned by `write`.
#[test]
fn given_partial_writes_when_write_exactly_called_then_sends_everything() {
    // GIVEN: A writer taking 5 bytes per call
    let mut writer = ChoppyWriter {
        written: Vec::new(),
        chunk: 5,
        interrupt_next: true,
        capacity: None,
    };
    let payload: Vec<u8> = (0u8..37).collect();

    // WHEN: Writing 37 bytes
    write_exactly(&mut writer, &payload).unwrap();

    // THEN: All 37 bytes went through in order
    assert_eq!(writer.written, payload);
}

/// **VALUE**: Verifies that a writer that stops accepting bytes produces an error.
///
/// **WHY THIS MATTERS**: Without this, a zero-length write would spin forever.
///
/// **BUG THIS CATCHES**: Would catch an infinite loop on `Ok(0)`.
#[test]
fn given_writer_stops_accepting_when_write_exactly_called_then_returns_write_zero() {
    // GIVEN: A writer that fills up after 8 bytes
    let mut writer = ChoppyWriter {
        written: Vec::new(),
        chunk: 4,
        interrupt_next: false,
        capacity: Some(8),
    };

    // WHEN: Writing 16 bytes
    let result = write_exactly(&mut writer, &[0u8; 16]);

    // THEN: WriteZero after the first 8
    assert_eq!(result.unwrap_err().kind(), ErrorKind::WriteZero);
    assert_eq!(writer.written.len(), 8);
}

/// **VALUE**: Verifies `wait_readable` times out on a silent peer and wakes on data.
///
/// **WHY THIS MATTERS**: This is the building block of the response deadline and the
/// stale-reply grace window.
///
/// **BUG THIS CATCHES**: Would catch passing the timeout in the wrong unit or ignoring it.
#[test]
fn given_socket_pair_when_waiting_then_reports_timeout_and_readiness() {
    // GIVEN: A connected pair with nothing written yet
    let (mut writer, reader) = UnixStream::pair().unwrap();

    // WHEN: Waiting 50ms on the silent side
    let started = Instant::now();
    let ready = wait_readable(&reader, Some(Duration::from_millis(50))).unwrap();

    // THEN: Times out after roughly the requested time
    assert!(!ready);
    assert!(started.elapsed() >= Duration::from_millis(40));

    // WHEN: Data arrives
    writer.write_all(b"x").unwrap();

    // THEN: Readable immediately
    assert!(wait_readable(&reader, Some(Duration::ZERO)).unwrap());
}

/// **VALUE**: Verifies a timeout that is not a whole number of milliseconds is waited out
/// in full.
///
/// **WHY THIS MATTERS**: The stale grace window and the response deadline are computed
/// from `Instant`s, so the remaining time is rarely a whole millisecond.
///
/// **BUG THIS CATCHES**: Would catch rounding the remaining time down, which turns the
/// last fraction of a millisecond into an immediate zero-timeout poll and gives up early.
#[test]
fn given_fractional_millisecond_timeout_when_waiting_then_full_timeout_elapses() {
    // GIVEN: A silent peer
    let (_writer, reader) = UnixStream::pair().unwrap();

    for timeout in [Duration::from_micros(500), Duration::from_micros(1500)] {
        // WHEN: Waiting for a fractional number of milliseconds
        let started = Instant::now();
        let ready = wait_readable(&reader, Some(timeout)).unwrap();

        // THEN: Not readable, and not before the timeout passed
        assert!(!ready);
        assert!(
            started.elapsed() >= timeout,
            "returned after {:?}, timeout was {timeout:?}",
            started.elapsed()
        );
    }
}

/// **VALUE**: Verifies that a hung-up peer counts as readable.
///
/// **WHY THIS MATTERS**: When the helper exits the client must wake up, read zero bytes
/// and reset the session rather than wait out its deadline.
///
/// **BUG THIS CATCHES**: Would catch checking only `POLLIN` in `revents`.
#[test]
fn given_peer_closed_when_waiting_then_reports_readable() {
    // GIVEN: A pair whose writer side is gone
    let (writer, reader) = UnixStream::pair().unwrap();
    drop(writer);

    // WHEN: Waiting without a timeout
    let ready = wait_readable(&reader, None).unwrap();

    // THEN: Wakes up
    assert!(ready);
}
