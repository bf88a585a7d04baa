//! Error types for sitesync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Direction;

/// Errors raised while loading or validating the configuration document.
///
/// Every variant is fatal at startup: the daemon never runs with an ambiguous
/// sync history.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// Underlying I/O failure while reading the document.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with serde_yaml's line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document parsed but violates the schema.
    #[error("invalid configuration at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Errors raised while writing the state document back to disk.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A single pair-direction's sync failed.
///
/// Never fatal. The sync record is not advanced, so the pair is retried on
/// the next tick.
#[derive(Debug, Error)]
pub enum SyncInvocationError {
    #[error("no {direction} sync hook configured")]
    NotConfigured { direction: Direction },

    #[error("failed to spawn sync hook `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sync hook `{command}` exited with {status}: {stderr}")]
    HookFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("sync hook `{command}` timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("{0}")]
    Failed(String),
}

pub(crate) fn persist_io(path: impl Into<PathBuf>, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.into(),
        source,
    }
}
