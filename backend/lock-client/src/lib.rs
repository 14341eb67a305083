//! Lock-broker IPC client.
//!
//! Mailbox locking is delegated to a separately launched helper process. This crate
//! spawns that helper on first use, talks to it over a private pair of pipes using a
//! small fixed-format record, and hands callers back an opaque [`LockId`].
//!
//! - [`protocol`]: the wire record and the byte-transfer primitives
//! - [`session`]: the helper supervisor and the lock/unlock operations
//! - [`config`]: tunables loaded from `lock-client.toml`
//! - [`error`]: typed failures with call-site locations

#[cfg(not(unix))]
compile_error!("lock-client talks to its helper over POSIX pipes and requires a unix target");

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod tests;

pub use config::LockClientConfig;
pub use error::lock::LockError;
pub use protocol::{HelperStatus, LockId};
pub use session::{HeldLock, LockSession};

/// File name of the lock helper executable.
pub const LOCK_HELPER_BINARY: &str = "camel-lock-helper-1.2";

/// Installation directory of the lock helper, fixed at build time.
pub const LOCK_HELPER_LIBEXEC_DIR: &str = match option_env!("LOCK_HELPER_LIBEXEC_DIR") {
    Some(dir) => dir,
    None => "/usr/libexec/evolution-data-server",
};

/// Full path the client launches when no other helper path is configured.
pub const LOCK_HELPER_PATH: &str =
    const_format::concatcp!(LOCK_HELPER_LIBEXEC_DIR, "/", LOCK_HELPER_BINARY);
