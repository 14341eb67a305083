//! Helper side of the lock protocol.

use crate::config::{HelperConfig, Mode};
use crate::error::HelperError;

use lock_client::protocol::{
    Command, HelperStatus, REQUEST_MAGIC, Record, read_request, write_exactly,
};

use common::ErrorLocation;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Write};
use std::panic::Location;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, error, info, warn};

/// Magic sent in place of the response magic by [`Mode::BadMagic`].
pub const BAD_MAGIC: u32 = 0x0BAD_CAFE;

/// How long [`Mode::SlowFirst`] and [`Mode::LateAnswer`] hold back a late answer.
pub const LATE_REPLY_DELAY: Duration = Duration::from_millis(300);

/// How long [`Mode::Linger`] stays alive after the request pipe closes.
pub const LINGER_TIME: Duration = Duration::from_secs(2);

/// Directory listing the descriptors of the current process.
const OPEN_FD_DIR: &str = "/dev/fd";

/// How a serving session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The client closed the request pipe.
    Finished,
    /// The helper quit without answering, as instructed.
    Crashed,
    /// The client sent something the protocol does not allow.
    Violation(String),
}

impl Outcome {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Outcome::Finished => 0,
            Outcome::Crashed => 1,
            Outcome::Violation(_) => 3,
        }
    }
}

enum Reply {
    Send(Vec<u8>),
    /// Chunks written one after another, each after its delay.
    Paced(Vec<(Duration, Vec<u8>)>),
    Silent,
    Crash,
}

/// Lock table plus the per-process protocol state.
pub struct FakeHelper {
    config: HelperConfig,
    locks: HashMap<u32, Vec<u8>>,
    next_lock_id: u32,
    last_sequence: Option<u32>,
    first_sequence: Option<u32>,
    handled: u64,
}

impl FakeHelper {
    pub fn new(config: HelperConfig) -> Self {
        Self {
            config,
            locks: HashMap::new(),
            next_lock_id: 1,
            last_sequence: None,
            first_sequence: None,
            handled: 0,
        }
    }

    /// Answer requests until the client hangs up, the mode says to crash, or the
    /// client breaks the protocol.
    ///
    /// # Errors
    ///
    /// Returns [`HelperError::Io`] if a pipe or the request log fails.
    pub fn serve<R: Read, W: Write>(
        &mut self,
        requests: &mut R,
        responses: &mut W,
    ) -> Result<Outcome, HelperError> {
        info!("Serving lock requests in {} mode", self.config.mode);

        loop {
            let (record, payload) = match read_request(requests) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("Request pipe closed");
                    self.record_line("EOF")?;
                    if self.config.mode == Mode::Linger {
                        debug!("Lingering for {LINGER_TIME:?} before exiting");
                        sleep(LINGER_TIME);
                    }
                    return Ok(Outcome::Finished);
                }
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return self.violation(e.to_string());
                }
                Err(e) => return Err(io_error("Failed to read request", e)),
            };

            self.record_request(&record, &payload)?;

            if let Some(problem) = self.check(&record) {
                return self.violation(problem);
            }
            self.last_sequence = Some(record.sequence);
            let first = self.handled == 0;
            if first {
                self.first_sequence = Some(record.sequence);
            }
            self.handled += 1;

            match self.reply(&record, &payload, first)? {
                Reply::Send(bytes) => send(responses, &bytes)?,
                Reply::Paced(chunks) => {
                    for (delay, bytes) in chunks {
                        sleep(delay);
                        send(responses, &bytes)?;
                    }
                }
                Reply::Silent => debug!("Not answering request {}", record.sequence),
                Reply::Crash => {
                    warn!("Dying on request {} as instructed", record.sequence);
                    return Ok(Outcome::Crashed);
                }
            }
        }
    }

    fn check(&self, record: &Record) -> Option<String> {
        if record.magic != REQUEST_MAGIC {
            return Some(format!("bad request magic {:#010x}", record.magic));
        }
        if record.command().is_none() {
            return Some(format!("unknown opcode {:#06x}", record.code));
        }
        match self.last_sequence {
            Some(last) if record.sequence <= last => Some(format!(
                "sequence {} does not follow {last}",
                record.sequence
            )),
            _ => None,
        }
    }

    fn reply(
        &mut self,
        record: &Record,
        payload: &[u8],
        first: bool,
    ) -> Result<Reply, HelperError> {
        let sequence = record.sequence;
        let stale = || Record::response(sequence.wrapping_sub(1), HelperStatus::Ok, 0);
        let first_sequence = self.first_sequence.unwrap_or(sequence);

        let mode = self.config.mode;
        let reply = match mode {
            Mode::Normal | Mode::Linger => {
                Reply::Send(self.answer(record, payload).to_bytes().to_vec())
            }
            Mode::StaleFirst if first => {
                Reply::Send(self.answer(record, payload).to_bytes().to_vec())
            }
            Mode::StaleFirst => {
                // Both headers in one write, so the real answer is already in the
                // pipe when the client reads the stale one.
                let mut bytes = stale().to_bytes().to_vec();
                bytes.extend_from_slice(&self.answer(record, payload).to_bytes());
                Reply::Send(bytes)
            }
            Mode::AlwaysStale if first => {
                Reply::Send(self.answer(record, payload).to_bytes().to_vec())
            }
            Mode::AlwaysStale => Reply::Send(
                Record::response(first_sequence, HelperStatus::Ok, 0)
                    .to_bytes()
                    .to_vec(),
            ),
            Mode::SlowFirst if first => Reply::Paced(vec![(
                LATE_REPLY_DELAY,
                self.answer(record, payload).to_bytes().to_vec(),
            )]),
            Mode::SlowFirst => Reply::Send(self.answer(record, payload).to_bytes().to_vec()),
            Mode::LateAnswer if first => {
                Reply::Send(self.answer(record, payload).to_bytes().to_vec())
            }
            Mode::LateAnswer => Reply::Paced(vec![
                (Duration::ZERO, stale().to_bytes().to_vec()),
                (
                    LATE_REPLY_DELAY,
                    self.answer(record, payload).to_bytes().to_vec(),
                ),
            ]),
            Mode::DieOnce => {
                if self.should_die(first)? {
                    Reply::Crash
                } else {
                    Reply::Send(self.answer(record, payload).to_bytes().to_vec())
                }
            }
            Mode::Hang => Reply::Silent,
            Mode::BadMagic => {
                let answer = Record {
                    magic: BAD_MAGIC,
                    ..self.answer(record, payload)
                };
                Reply::Send(answer.to_bytes().to_vec())
            }
            Mode::FutureSequence => {
                let answer = Record {
                    sequence: sequence.wrapping_add(1),
                    ..self.answer(record, payload)
                };
                Reply::Send(answer.to_bytes().to_vec())
            }
        };

        Ok(reply)
    }

    /// What a well-behaved helper would say.
    fn answer(&mut self, record: &Record, payload: &[u8]) -> Record {
        let sequence = record.sequence;

        match record.command() {
            Some(Command::Lock) if payload.is_empty() => {
                Record::response(sequence, HelperStatus::Invalid, 0)
            }
            Some(Command::Lock) if self.locks.values().any(|held| held == payload) => {
                debug!("{} is already locked", String::from_utf8_lossy(payload));
                Record::response(sequence, HelperStatus::System, 0)
            }
            Some(Command::Lock) => {
                let lock_id = self.next_lock_id;
                self.next_lock_id = self.next_lock_id.wrapping_add(1).max(1);
                self.locks.insert(lock_id, payload.to_vec());
                debug!("Locked {} as {lock_id}", String::from_utf8_lossy(payload));
                Record::response(sequence, HelperStatus::Ok, lock_id)
            }
            Some(Command::Unlock) => match self.locks.remove(&record.data) {
                Some(path) => {
                    debug!("Unlocked {}", String::from_utf8_lossy(&path));
                    Record::response(sequence, HelperStatus::Ok, 0)
                }
                None => Record::response(sequence, HelperStatus::Invalid, 0),
            },
            None => Record::response(sequence, HelperStatus::Protocol, 0),
        }
    }

    fn should_die(&self, first: bool) -> Result<bool, HelperError> {
        if !first {
            return Ok(false);
        }
        let Some(marker) = &self.config.marker else {
            return Ok(true);
        };
        if marker.exists() {
            return Ok(false);
        }
        File::create(marker).map_err(|e| io_error("Failed to create marker file", e))?;
        Ok(true)
    }

    fn violation(&self, problem: String) -> Result<Outcome, HelperError> {
        error!("Protocol violation: {problem}");
        self.record_line(&format!("VIOLATION {problem}"))?;
        Ok(Outcome::Violation(problem))
    }

    fn record_request(&self, record: &Record, payload: &[u8]) -> Result<(), HelperError> {
        let line = match record.command() {
            Some(Command::Lock) => format!(
                "REQUEST {} lock {}",
                record.sequence,
                String::from_utf8_lossy(payload)
            ),
            Some(Command::Unlock) => format!("REQUEST {} unlock {}", record.sequence, record.data),
            None => format!("REQUEST {} {:#06x} {}", record.sequence, record.code, record.data),
        };
        self.record_line(&line)
    }

    fn record_line(&self, line: &str) -> Result<(), HelperError> {
        let Some(path) = &self.config.request_log else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_error("Failed to open request log", e))?;
        writeln!(file, "{line}").map_err(|e| io_error("Failed to append to request log", e))
    }
}

fn send<W: Write>(responses: &mut W, bytes: &[u8]) -> Result<(), HelperError> {
    write_exactly(responses, bytes)
        .and_then(|()| responses.flush())
        .map_err(|e| io_error("Failed to write response", e))
}

/// Write the numbers of this process's open descriptors to `path`, one per line.
///
/// The listing includes the descriptor used to read the directory itself.
///
/// # Errors
///
/// Returns [`HelperError::Io`] if the descriptor directory or the report file fails.
pub fn report_descriptors(path: &Path) -> Result<(), HelperError> {
    let entries =
        fs::read_dir(OPEN_FD_DIR).map_err(|e| io_error("Failed to list open descriptors", e))?;

    let mut descriptors = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error("Failed to list open descriptors", e))?;
        if let Some(fd) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) {
            descriptors.push(fd);
        }
    }
    descriptors.sort_unstable();

    let report: String = descriptors.iter().map(|fd| format!("{fd}\n")).collect();
    fs::write(path, report).map_err(|e| io_error("Failed to write descriptor report", e))
}

#[track_caller]
fn io_error(message: &str, source: IoError) -> HelperError {
    HelperError::Io {
        message: message.to_string(),
        location: ErrorLocation::from(Location::caller()),
        source,
    }
}
