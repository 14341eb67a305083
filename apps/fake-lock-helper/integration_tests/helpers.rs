// Shared scaffolding: a wrapper script that launches the fake helper in a chosen mode

use fake_lock_helper::config::{
    FD_REPORT_ENV, LOG_DIR_ENV, MARKER_ENV, MODE_ENV, REQUEST_LOG_ENV,
};

use lock_client::{LockClientConfig, LockSession};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::{TempDir, tempdir};

const FAKE_HELPER_BINARY: &str = env!("CARGO_BIN_EXE_fake-lock-helper");

/// One line of the request log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Logged {
    Request {
        sequence: u32,
        command: String,
        argument: String,
    },
    Violation(String),
    Eof,
}

/// A fake helper installed in a temporary directory.
///
/// The lock client cannot pass environment variables to its helper, so each
/// scenario gets a small shell script that sets them and execs the real binary.
pub struct FakeHelperInstall {
    dir: TempDir,
    script: PathBuf,
}

impl FakeHelperInstall {
    pub fn new(mode: &str) -> Self {
        let dir = tempdir().unwrap();
        let script = dir.path().join("lock-helper");

        let contents = format!(
            "#!/bin/sh\n\
             export {MODE_ENV}='{mode}'\n\
             export {REQUEST_LOG_ENV}='{log}'\n\
             export {MARKER_ENV}='{marker}'\n\
             export {LOG_DIR_ENV}='{dir}'\n\
             export {FD_REPORT_ENV}='{fds}'\n\
             exec '{FAKE_HELPER_BINARY}'\n",
            log = dir.path().join("requests.log").display(),
            fds = dir.path().join("fds").display(),
            marker = dir.path().join("died").display(),
            dir = dir.path().display(),
        );
        fs::write(&script, contents).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, script }
    }

    pub fn path(&self) -> &Path {
        &self.script
    }

    pub fn config(&self) -> LockClientConfig {
        LockClientConfig::default()
            .with_helper_path(&self.script)
            .with_stale_grace(Duration::from_millis(100))
    }

    pub fn session(&self) -> LockSession {
        LockSession::new(self.config())
    }

    /// Everything the helper processes have recorded so far.
    pub fn log(&self) -> Vec<Logged> {
        let Ok(contents) = fs::read_to_string(self.dir.path().join("requests.log")) else {
            return Vec::new();
        };

        contents
            .lines()
            .map(|line| {
                if line == "EOF" {
                    return Logged::Eof;
                }
                if let Some(problem) = line.strip_prefix("VIOLATION ") {
                    return Logged::Violation(problem.to_string());
                }
                let mut parts = line.splitn(4, ' ');
                assert_eq!(parts.next(), Some("REQUEST"), "unexpected log line {line}");
                Logged::Request {
                    sequence: parts.next().unwrap().parse().unwrap(),
                    command: parts.next().unwrap().to_string(),
                    argument: parts.next().unwrap_or_default().to_string(),
                }
            })
            .collect()
    }

    /// Sequence numbers of every request received, in arrival order.
    pub fn sequences(&self) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Logged::Request { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect()
    }

    /// Descriptors the most recently started helper had open when it started.
    pub fn descriptors(&self) -> Vec<i32> {
        fs::read_to_string(self.dir.path().join("fds"))
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Logged::Violation(problem) => Some(problem),
                _ => None,
            })
            .collect()
    }
}

pub fn assert_strictly_increasing(sequences: &[u32]) {
    for pair in sequences.windows(2) {
        assert!(pair[0] < pair[1], "sequence went from {} to {}", pair[0], pair[1]);
    }
}
