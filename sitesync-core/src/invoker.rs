//! Boundary to the external synchronization routines.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SiteConfig;
use crate::error::SyncInvocationError;
use crate::schedule::DueSync;
use crate::types::{Direction, PairDirectionKey};

/// Everything one sync call gets to see.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    pub key: PairDirectionKey,
    pub from_site: SiteConfig,
    pub to_site: SiteConfig,
    pub last_run: DateTime<Utc>,
    /// `true` when called from the running daemon rather than a one-off run.
    pub daemon_mode: bool,
    pub config_path: PathBuf,
}

impl SyncRequest {
    pub fn from_due(due: DueSync, daemon_mode: bool, config_path: PathBuf) -> Self {
        Self {
            key: due.key,
            from_site: due.from_site,
            to_site: due.to_site,
            last_run: due.last_run,
            daemon_mode,
            config_path,
        }
    }
}

/// One synchronization routine per direction.
///
/// Calls may block on network I/O; the scheduler runs them on blocking worker
/// threads. The returned instant is recorded (minute-truncated) as the
/// pair-direction's last successful sync.
pub trait SyncInvoker: Send + Sync {
    fn sync_forward(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError>;

    fn sync_reverse(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError>;

    /// Dispatch on `request.key.direction`.
    fn invoke(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
        match request.key.direction {
            Direction::SourceToDestination => self.sync_forward(request),
            Direction::DestinationToSource => self.sync_reverse(request),
        }
    }
}
