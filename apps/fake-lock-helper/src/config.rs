use crate::error::HelperError;

use common::ErrorLocation;

use std::env;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::panic::Location;
use std::path::PathBuf;
use std::str::FromStr;

/// Behavior selector.
pub const MODE_ENV: &str = "FAKE_LOCK_HELPER_MODE";

/// File that every received request is appended to.
pub const REQUEST_LOG_ENV: &str = "FAKE_LOCK_HELPER_LOG";

/// Marker file that makes `die-once` die only on the first run.
pub const MARKER_ENV: &str = "FAKE_LOCK_HELPER_MARKER";

/// Directory for the diagnostic log file.
pub const LOG_DIR_ENV: &str = "FAKE_LOCK_HELPER_LOG_DIR";

/// File the helper writes its open descriptor numbers to at startup.
pub const FD_REPORT_ENV: &str = "FAKE_LOCK_HELPER_FD_REPORT";

// ============================================
// MODE
// ============================================

/// How the helper answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Grant and release locks like a real helper.
    #[default]
    Normal,
    /// Precede every reply after the first with a reply to the previous request.
    StaleFirst,
    /// Answer the first request, then only ever repeat that request's sequence.
    AlwaysStale,
    /// Answer the first request late, everything after it at once.
    SlowFirst,
    /// After the first request, reply stale at once and give the real answer late.
    LateAnswer,
    /// Exit without answering the first request (once per marker file).
    DieOnce,
    /// Read requests but never answer.
    Hang,
    /// Answer with a magic that is not the response magic.
    BadMagic,
    /// Answer with a sequence one ahead of the request.
    FutureSequence,
    /// Answer normally but take a long time to exit after the request pipe closes.
    Linger,
}

impl Mode {
    const ALL: [Mode; 10] = [
        Mode::Normal,
        Mode::StaleFirst,
        Mode::AlwaysStale,
        Mode::SlowFirst,
        Mode::LateAnswer,
        Mode::DieOnce,
        Mode::Hang,
        Mode::BadMagic,
        Mode::FutureSequence,
        Mode::Linger,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::StaleFirst => "stale-first",
            Mode::AlwaysStale => "always-stale",
            Mode::SlowFirst => "slow-first",
            Mode::LateAnswer => "late-answer",
            Mode::DieOnce => "die-once",
            Mode::Hang => "hang",
            Mode::BadMagic => "bad-magic",
            Mode::FutureSequence => "future-sequence",
            Mode::Linger => "linger",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        formatter.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = HelperError;

    #[track_caller]
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match Mode::ALL.into_iter().find(|mode| mode.name() == value) {
            Some(mode) => Ok(mode),
            None => Err(HelperError::Config {
                message: format!("Unknown mode '{value}'"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

// ============================================
// CONFIG
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperConfig {
    pub mode: Mode,
    pub request_log: Option<PathBuf>,
    pub marker: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub fd_report: Option<PathBuf>,
}

impl HelperConfig {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_request_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.request_log = Some(path.into());
        self
    }

    pub fn with_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker = Some(path.into());
        self
    }

    /// Read the configuration from the `FAKE_LOCK_HELPER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`HelperError::Config`] if the mode is not recognized.
    pub fn from_env() -> Result<Self, HelperError> {
        let mode = match env::var(MODE_ENV) {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => Mode::default(),
        };

        Ok(Self {
            mode,
            request_log: env::var_os(REQUEST_LOG_ENV).map(PathBuf::from),
            marker: env::var_os(MARKER_ENV).map(PathBuf::from),
            log_dir: env::var_os(LOG_DIR_ENV).map(PathBuf::from),
            fd_report: env::var_os(FD_REPORT_ENV).map(PathBuf::from),
        })
    }
}
