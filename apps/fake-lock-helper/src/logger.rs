//! Diagnostic logging for the fake lock helper.
//!
//! Stdout carries protocol responses, so log output goes to stderr (with colors) and,
//! when a log directory is configured, to a plain-text file.

use crate::error::HelperError;

use common::ErrorLocation;

use std::io::stderr;
use std::panic::Location;
use std::path::Path;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::format_rfc3339;
use log::{LevelFilter, info, warn};

/// Thread-safe initialization guard.
static INIT_LOGGER_ONCE: Once = Once::new();

/// Tracks if logger initialization was already attempted.
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

const LOG_FILE_NAME: &str = "fake-lock-helper.log";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Initialize logging to stderr and, if `log_dir` is given, to a file inside it.
///
/// Safe to call more than once; later calls log a warning and return `Ok`.
///
/// # Errors
///
/// Returns an error if the log file cannot be created or a logger is already installed.
pub fn initialize(log_dir: Option<&Path>) -> Result<(), HelperError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("Logger already initialized");
        return Ok(());
    }

    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(log_dir);
        if result.is_ok() {
            info!("Logger initialized with level: {LOG_LEVEL:?}");
        }
    });

    result
}

#[track_caller]
fn initialize_internal(log_dir: Option<&Path>) -> Result<(), HelperError> {
    let color_configuration = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let pid = std::process::id();

    let stderr_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] fake-lock-helper[{pid}]: {message}",
                date = format_rfc3339(SystemTime::now()),
                level = color_configuration.color(record.level()),
            ))
        })
        .chain(stderr());

    let mut base_dispatch = Dispatch::new().level(LOG_LEVEL).chain(stderr_dispatch);

    if let Some(log_dir) = log_dir {
        let log_file = match fern::log_file(log_dir.join(LOG_FILE_NAME)) {
            Ok(file) => file,
            Err(e) => {
                return Err(HelperError::Logger {
                    message: format!("Failed to create log file: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        let file_dispatch = Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{date} - {level}] [{pid}] {message} [{file}:{line}]",
                    date = format_rfc3339(SystemTime::now()),
                    level = record.level(),
                    file = record.file().unwrap_or("unknown"),
                    line = record.line().unwrap_or(0),
                ))
            })
            .chain(log_file);

        base_dispatch = base_dispatch.chain(file_dispatch);
    }

    if let Err(e) = base_dispatch.apply() {
        return Err(HelperError::Logger {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    Ok(())
}
