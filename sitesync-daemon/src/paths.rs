use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const CONFIG_FILE: &str = "config.yaml";

/// Pause between SIGTERMs while waiting for the daemon to exit.
pub const STOP_BACKOFF: Duration = Duration::from_millis(100);
pub const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(60);
/// Bound on runtime teardown once the scheduler has returned.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub fn default_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("sitesync").join(CONFIG_FILE)
}

pub fn stdout_log_path(working_dir: &Path) -> PathBuf {
    working_dir.join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(working_dir: &Path) -> PathBuf {
    working_dir.join(DAEMON_STDERR_LOG)
}
