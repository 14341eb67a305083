//! Wire protocol spoken between the client and the lock helper.
//!
//! Every message starts with a 16-byte header of four `u32` fields
//! (`magic`, `sequence`, `command/status`, `data`). Lock requests are
//! followed by `data` bytes of path; nothing else carries a payload.
//! Fields are written one by one in native byte order: the helper is
//! always a child of this process on the same host.

mod record;
mod transfer;

pub use record::{
    Command, HEADER_LEN, HelperStatus, LockId, MAX_PATH_LEN, REQUEST_MAGIC, RESPONSE_MAGIC, Record,
    encode_request, read_request, read_response,
};
pub use transfer::{read_exactly, wait_readable, write_exactly};
