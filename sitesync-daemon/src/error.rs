use std::path::PathBuf;

use thiserror::Error;

use sitesync_core::{ConfigError, PersistenceError};

/// Error surface for process lifecycle and scheduler runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("pidfile {pidfile} already exists and pid {pid} is alive; daemon already running?")]
    AlreadyRunning { pid: i32, pidfile: PathBuf },

    #[error("{operation} failed: {source}")]
    ProcessControl {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory {path} is not usable: {reason}")]
    WorkingDir { path: PathBuf, reason: String },

    #[error("malformed pidfile {path}: {content:?}")]
    MalformedPidfile { path: PathBuf, content: String },

    #[error("daemon (pid {pid}) still running {secs}s after SIGTERM")]
    StopTimedOut { pid: i32, secs: u64 },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn os_err(operation: &'static str) -> DaemonError {
    DaemonError::ProcessControl {
        operation,
        source: std::io::Error::last_os_error(),
    }
}
