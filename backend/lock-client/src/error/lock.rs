use crate::protocol::HelperStatus;

use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Failures reported by [`LockSession`](crate::LockSession) operations.
#[derive(Debug, ThisError)]
pub enum LockError {
    /// Pipe creation, spawn, read or write failed at the OS level.
    #[error("System Error: {message}: {source} {location}")]
    System {
        message: String,
        location: ErrorLocation,
        #[source]
        source: IoError,
    },

    /// Bad magic, a sequence number ahead of the request, or an exhausted retry budget.
    #[error("Protocol Error: {message} {location}")]
    Protocol {
        message: String,
        location: ErrorLocation,
    },

    /// The helper answered the request with a non-OK status.
    #[error("Helper Error: {message} ({status}) {location}")]
    Helper {
        status: HelperStatus,
        message: String,
        location: ErrorLocation,
    },

    /// The helper closed its end of the pipes. The session has been reset.
    #[error("Helper Died Error: {message} {location}")]
    HelperDied {
        message: String,
        location: ErrorLocation,
    },

    /// No response arrived within the configured deadline.
    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },

    /// Unlock requested while no helper is running.
    #[error("Not Running Error: {message} {location}")]
    NotRunning {
        message: String,
        location: ErrorLocation,
    },

    /// The request cannot be framed by the wire protocol.
    #[error("Invalid Request Error: {message} {location}")]
    InvalidRequest {
        message: String,
        location: ErrorLocation,
    },
}

impl LockError {
    #[track_caller]
    pub(crate) fn system(message: impl Into<String>, source: IoError) -> Self {
        LockError::System {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
            source,
        }
    }

    #[track_caller]
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        LockError::Protocol {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn helper(status: HelperStatus, message: impl Into<String>) -> Self {
        LockError::Helper {
            status,
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn helper_died(message: impl Into<String>) -> Self {
        LockError::HelperDied {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Status reported by the helper, if the helper answered at all.
    pub fn helper_status(&self) -> Option<HelperStatus> {
        match self {
            LockError::Helper { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this failure came from the wire exchange going out of step.
    pub fn is_protocol(&self) -> bool {
        matches!(self, LockError::Protocol { .. })
    }
}
