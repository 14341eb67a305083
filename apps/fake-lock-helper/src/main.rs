use fake_lock_helper::config::HelperConfig;
use fake_lock_helper::error::HelperError;
use fake_lock_helper::helper::{FakeHelper, report_descriptors};
use fake_lock_helper::logger::initialize as LoggerInitialize;

use common::ErrorLocation;

use std::fs::File;
use std::io::{stdin, stdout};
use std::os::fd::AsFd;
use std::panic::Location;
use std::process::ExitCode;

use log::{error, info};

/// Exit status for failures of the helper itself, as opposed to scripted outcomes.
const FAILURE_STATUS: u8 = 2;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            eprintln!("fake-lock-helper: {e}");
            ExitCode::from(FAILURE_STATUS)
        }
    }
}

fn run() -> Result<u8, HelperError> {
    let config = HelperConfig::from_env()?;
    // Before the logger opens anything of its own.
    if let Some(path) = &config.fd_report {
        report_descriptors(path)?;
    }
    LoggerInitialize(config.log_dir.as_deref())?;

    // Write responses through an unbuffered handle: each reply must reach the pipe
    // in a single write.
    let mut responses = match stdout().as_fd().try_clone_to_owned() {
        Ok(fd) => File::from(fd),
        Err(e) => {
            return Err(HelperError::Io {
                message: "Failed to duplicate stdout".to_string(),
                location: ErrorLocation::from(Location::caller()),
                source: e,
            });
        }
    };
    let mut requests = stdin().lock();

    let outcome = FakeHelper::new(config).serve(&mut requests, &mut responses)?;
    info!("Exiting: {outcome:?}");

    Ok(outcome.exit_code())
}
