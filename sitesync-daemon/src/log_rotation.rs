//! Size-based rotation of the detached daemon's log files.
//!
//! `daemon.log` and `daemon-err.log` in the working directory are rotated once
//! they reach [`MAX_LOG_BYTES`], keeping [`MAX_ROTATED_FILES`] numbered copies
//! (`daemon.log.1` newest). The process keeps writing to the renamed file
//! until its standard streams are reopened.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{stderr_log_path, stdout_log_path};

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            keep: MAX_ROTATED_FILES,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log` if it has reached `max_bytes`. Returns whether it did; a
    /// missing file is not an error.
    pub fn rotate(&self, log: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes || self.keep == 0 {
            return Ok(false);
        }

        remove_if_present(&numbered(log, self.keep))?;
        for n in (1..self.keep).rev() {
            let from = numbered(log, n);
            if from.exists() {
                fs::rename(&from, numbered(log, n + 1))?;
            }
        }
        fs::rename(log, numbered(log, 1))?;
        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log)?;
        Ok(true)
    }
}

/// Rotate both daemon logs under `working_dir` with the default policy.
///
/// Failures are logged per file. Returns whether either file rotated.
pub fn rotate_daemon_logs(working_dir: &Path) -> bool {
    let policy = RotationPolicy::default();
    let mut rotated = false;
    for log in [stdout_log_path(working_dir), stderr_log_path(working_dir)] {
        match policy.rotate(&log) {
            Ok(true) => {
                tracing::info!(path = %log.display(), "log file rotated");
                rotated = true;
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
        }
    }
    rotated
}

fn numbered(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "daemon.log".to_string());
    base.with_file_name(format!("{name}.{n}"))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
