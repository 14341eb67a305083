use crate::protocol::transfer::read_exactly;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::io::{Error as IoError, ErrorKind, Read};

/// Size of the fixed header shared by requests and responses.
pub const HEADER_LEN: usize = 16;

/// Magic carried by every request.
pub const REQUEST_MAGIC: u32 = 0xABAD_F00D;

/// Magic carried by every response.
pub const RESPONSE_MAGIC: u32 = 0xDEAD_BEEF;

/// Largest path payload a request reader will accept.
pub const MAX_PATH_LEN: usize = 4096;

const LOCK_CODE: u32 = 0x0F0F;
const UNLOCK_CODE: u32 = 0xF0F0;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Lock,
    Unlock,
}

impl Command {
    pub const fn code(self) -> u32 {
        match self {
            Command::Lock => LOCK_CODE,
            Command::Unlock => UNLOCK_CODE,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            LOCK_CODE => Some(Command::Lock),
            UNLOCK_CODE => Some(Command::Unlock),
            _ => None,
        }
    }
}

/// Status codes carried in the command/status field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperStatus {
    Ok,
    Protocol,
    NoMemory,
    System,
    Invalid,
    /// A code this client does not know about.
    Unknown(u32),
}

impl HelperStatus {
    pub const fn code(self) -> u32 {
        match self {
            HelperStatus::Ok => 0,
            HelperStatus::Protocol => 1,
            HelperStatus::NoMemory => 2,
            HelperStatus::System => 3,
            HelperStatus::Invalid => 4,
            HelperStatus::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => HelperStatus::Ok,
            1 => HelperStatus::Protocol,
            2 => HelperStatus::NoMemory,
            3 => HelperStatus::System,
            4 => HelperStatus::Invalid,
            other => HelperStatus::Unknown(other),
        }
    }
}

impl Display for HelperStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        match self {
            HelperStatus::Ok => write!(formatter, "ok"),
            HelperStatus::Protocol => write!(formatter, "protocol error"),
            HelperStatus::NoMemory => write!(formatter, "out of memory"),
            HelperStatus::System => write!(formatter, "system error"),
            HelperStatus::Invalid => write!(formatter, "invalid request"),
            HelperStatus::Unknown(code) => write!(formatter, "unknown status {code}"),
        }
    }
}

/// Opaque token for a lock held by the helper.
///
/// Only the helper knows what the value means; the client hands it back on unlock
/// and never looks inside. The token also remembers which helper process granted
/// it, since a respawned helper numbers its locks from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId {
    raw: u32,
    generation: u32,
}

impl LockId {
    pub(crate) const fn new(raw: u32, generation: u32) -> Self {
        Self { raw, generation }
    }

    /// Value sent on the wire.
    pub(crate) const fn raw(self) -> u32 {
        self.raw
    }

    /// Which spawned helper granted the lock, counting from 1.
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl Display for LockId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        write!(formatter, "#{}", self.raw)
    }
}

/// One protocol header.
///
/// `code` holds the opcode on requests and the status on responses; `data` holds
/// the path length, the lock id to release, or the granted lock id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub magic: u32,
    pub sequence: u32,
    pub code: u32,
    pub data: u32,
}

impl Record {
    pub const fn lock_request(sequence: u32, path_len: u32) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            sequence,
            code: LOCK_CODE,
            data: path_len,
        }
    }

    pub const fn unlock_request(sequence: u32, lock_id: LockId) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            sequence,
            code: UNLOCK_CODE,
            data: lock_id.raw(),
        }
    }

    pub const fn response(sequence: u32, status: HelperStatus, data: u32) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            sequence,
            code: status.code(),
            data,
        }
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.code)
    }

    pub fn status(&self) -> HelperStatus {
        HelperStatus::from_code(self.code)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        for (slot, field) in bytes
            .chunks_exact_mut(4)
            .zip([self.magic, self.sequence, self.code, self.data])
        {
            slot.copy_from_slice(&field.to_ne_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let field = |index: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
            u32::from_ne_bytes(word)
        };

        Self {
            magic: field(0),
            sequence: field(1),
            code: field(2),
            data: field(3),
        }
    }
}

/// Serialize a request header followed by its payload into one buffer, so it can go
/// out in a single write.
pub fn encode_request(record: &Record, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());
    buffer.extend_from_slice(&record.to_bytes());
    buffer.extend_from_slice(payload);
    buffer
}

fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Record>, IoError> {
    let mut header = [0u8; HEADER_LEN];
    let read = read_exactly(reader, &mut header)?;
    if read < HEADER_LEN {
        return Ok(None);
    }
    Ok(Some(Record::from_bytes(&header)))
}

/// Read one response header.
///
/// Returns `Ok(None)` when the peer closed the pipe before a full header arrived.
pub fn read_response<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Record>, IoError> {
    read_header(reader)
}

/// Read one request header plus, for well-formed lock requests, its path payload.
///
/// Returns `Ok(None)` when the peer closed the pipe before a complete request arrived.
pub fn read_request<R: Read + ?Sized>(
    reader: &mut R,
) -> Result<Option<(Record, Vec<u8>)>, IoError> {
    let Some(record) = read_header(reader)? else {
        return Ok(None);
    };

    if record.magic != REQUEST_MAGIC || record.command() != Some(Command::Lock) {
        return Ok(Some((record, Vec::new())));
    }

    let len = record.data as usize;
    if len > MAX_PATH_LEN {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("lock request payload of {len} bytes exceeds {MAX_PATH_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    if read_exactly(reader, &mut payload)? < len {
        return Ok(None);
    }

    Ok(Some((record, payload)))
}
