//! Start, stop and restart the daemon process.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sitesync_core::{StateStore, SyncInvoker};

use crate::error::{io_err, DaemonError};
use crate::hooks::CommandInvoker;
use crate::paths::{SHUTDOWN_TIMEOUT, STOP_BACKOFF};
use crate::process::{
    fork_and_exit_parent, new_session, process_alive, read_pidfile, redirect_standard_streams,
    remove_pidfile, reset_umask, terminate,
};
use crate::runtime::{build_runtime, serve};

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Stay attached to the terminal (for systemd/launchd supervision).
    pub foreground: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: i32 },
}

/// Start the daemon and block until it shuts down.
///
/// Without `foreground` the calling process exits inside this function and
/// only the detached grandchild returns.
pub fn start(
    store: StateStore,
    invoker: Arc<dyn SyncInvoker>,
    options: StartOptions,
) -> Result<(), DaemonError> {
    let working_dir = store.working_dir().to_path_buf();
    ensure_working_dir(&working_dir)?;
    check_not_running(&store.pidfile_path())?;

    let streams_redirected = if options.foreground {
        std::env::set_current_dir(&working_dir).map_err(|e| io_err(&working_dir, e))?;
        false
    } else {
        tracing::info!(working_dir = %working_dir.display(), "detaching daemon");
        daemonize(&working_dir, store.config().daemon.debug)?
    };

    let runtime = build_runtime()?;
    let result = runtime.block_on(serve(store, invoker, streams_redirected));
    // Abandoned sync workers must not keep the process alive.
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

/// Ask the daemon recorded in `pidfile` to exit and wait until it has.
pub fn stop(pidfile: &Path, timeout: Duration) -> Result<StopOutcome, DaemonError> {
    let pid = match read_pidfile(pidfile) {
        Ok(Some(pid)) => pid,
        Ok(None) => {
            tracing::info!(pidfile = %pidfile.display(), "pidfile does not exist; daemon not running?");
            return Ok(StopOutcome::NotRunning);
        }
        Err(err) => {
            tracing::error!(error = %err, "cannot read pidfile; daemon not running?");
            return Ok(StopOutcome::NotRunning);
        }
    };

    let deadline = Instant::now() + timeout;
    while terminate(pid)? {
        if Instant::now() >= deadline {
            return Err(DaemonError::StopTimedOut {
                pid,
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(STOP_BACKOFF);
    }

    if remove_pidfile(pidfile)? {
        tracing::debug!(pidfile = %pidfile.display(), "removed pidfile left by daemon");
    }
    tracing::info!(pid, "daemon stopped");
    Ok(StopOutcome::Stopped { pid })
}

/// `stop` followed by `start`, with the hook invoker from `config`.
///
/// The document is loaded again after the stop so the records the old daemon
/// saved on exit are not overwritten.
pub fn restart(config: &Path, options: StartOptions) -> Result<(), DaemonError> {
    let store = StateStore::load(config)?;
    stop(&store.pidfile_path(), store.config().daemon.stop_timeout())?;

    let store = StateStore::load(config)?;
    let invoker = Arc::new(CommandInvoker::new(store.config().hooks.clone()));
    start(store, invoker, options)
}

/// Final shutdown step, run once after the scheduler returns: remove the
/// pidfile and flush the store. Failures are logged and do not block exit.
pub fn cleanup_and_die(pidfile: &Path, store: &mut StateStore) {
    match remove_pidfile(pidfile) {
        Ok(_) => {}
        Err(err) => tracing::error!(error = %err, "failed to remove pidfile"),
    }
    match store.flush() {
        Ok(()) => tracing::info!(
            path = %store.origin().display(),
            records = store.state().len(),
            "sync state saved",
        ),
        Err(err) => tracing::error!(error = %err, "failed to save sync state"),
    }
    tracing::info!("daemon stopped");
}

fn ensure_working_dir(path: &Path) -> Result<(), DaemonError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DaemonError::WorkingDir {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        }),
        Err(err) => Err(DaemonError::WorkingDir {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

/// Fail if the pidfile names a live process; clear it if stale.
fn check_not_running(pidfile: &Path) -> Result<(), DaemonError> {
    match read_pidfile(pidfile) {
        Ok(None) => return Ok(()),
        Ok(Some(pid)) if process_alive(pid)? => {
            return Err(DaemonError::AlreadyRunning {
                pid,
                pidfile: pidfile.to_path_buf(),
            });
        }
        Ok(Some(pid)) => {
            tracing::warn!(pid, pidfile = %pidfile.display(), "removing stale pidfile");
        }
        Err(err) => {
            tracing::warn!(error = %err, "removing unreadable pidfile");
        }
    }
    remove_pidfile(pidfile)?;
    Ok(())
}

/// Double fork into a session-less grandchild rooted at `working_dir`.
///
/// Returns whether the standard streams were redirected to the log files
/// (skipped when `debug` is set).
fn daemonize(working_dir: &Path, debug: bool) -> Result<bool, DaemonError> {
    fork_and_exit_parent("first fork")?;
    std::env::set_current_dir(working_dir).map_err(|e| io_err(working_dir, e))?;
    new_session()?;
    reset_umask();
    fork_and_exit_parent("second fork")?;

    if debug {
        return Ok(false);
    }
    redirect_standard_streams(working_dir)?;
    Ok(true)
}
