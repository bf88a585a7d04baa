use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use sitesync_core::{StateStore, SyncInvoker};

use crate::error::{io_err, DaemonError};
use crate::lifecycle::cleanup_and_die;
use crate::paths::LOG_ROTATION_INTERVAL;
use crate::process::{reopen_log_streams, write_pidfile};
use crate::scheduler::Scheduler;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(format: LogFormat, ansi: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false).with_ansi(ansi);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub(crate) fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sitesync-worker")
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Run the daemon body inside the runtime: signal listener, optional log
/// rotation, then the scheduler until a termination signal arrives.
///
/// `streams_redirected` enables rotation of the daemon log files.
pub async fn serve(
    store: StateStore,
    invoker: Arc<dyn SyncInvoker>,
    streams_redirected: bool,
) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let scheduler_rx = shutdown_tx.subscribe();
    let signal_handle = spawn_signal_listener(shutdown_tx.clone())?;

    let rotation_handle = streams_redirected.then(|| {
        let working_dir = store.working_dir().to_path_buf();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(log_rotation_task(working_dir, LOG_ROTATION_INTERVAL, shutdown_rx))
    });

    let result = run_until_shutdown(store, invoker, scheduler_rx).await;

    let _ = shutdown_tx.send(());
    signal_handle.abort();
    if let Some(handle) = rotation_handle {
        let _ = handle.await;
    }
    result
}

/// Write the pidfile, run the scheduler until `shutdown_rx` fires, then clean
/// up exactly once.
pub async fn run_until_shutdown(
    store: StateStore,
    invoker: Arc<dyn SyncInvoker>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let pidfile = store.pidfile_path();
    let pid = std::process::id();
    write_pidfile(&pidfile, pid)?;
    tracing::info!(
        pid,
        pidfile = %pidfile.display(),
        config = %store.origin().display(),
        "daemon started",
    );

    let mut store = Scheduler::new(store, invoker).run(shutdown_rx).await;
    cleanup_and_die(&pidfile, &mut store);
    Ok(())
}

/// Broadcast shutdown on SIGTERM or SIGINT.
///
/// Handlers are installed before this returns. Tokio keeps them installed for
/// the life of the process, so repeated signals from `stop` are absorbed.
fn spawn_signal_listener(
    shutdown: broadcast::Sender<()>,
) -> Result<JoinHandle<()>, DaemonError> {
    let mut terminate = signal(SignalKind::terminate()).map_err(|source| {
        DaemonError::ProcessControl {
            operation: "install SIGTERM handler",
            source,
        }
    })?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(|source| {
        DaemonError::ProcessControl {
            operation: "install SIGINT handler",
            source,
        }
    })?;
    let mut shutdown_rx = shutdown.subscribe();

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "received termination signal, shutting down");
        let _ = shutdown.send(());
    }))
}

async fn log_rotation_task(
    working_dir: PathBuf,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let working_dir = working_dir.clone();
                let rotated = tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_daemon_logs(&working_dir)
                        && reopen_after_rotation(&working_dir)
                })
                .await
                .unwrap_or(false);
                if rotated {
                    tracing::info!("daemon log streams reopened");
                }
            }
        }
    }
}

fn reopen_after_rotation(working_dir: &std::path::Path) -> bool {
    match reopen_log_streams(working_dir) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "failed to reopen daemon log streams");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use chrono::{DateTime, Utc};
    use sitesync_core::{clock, SyncInvocationError, SyncRequest};
    use tempfile::TempDir;

    struct ForwardOnly;

    impl SyncInvoker for ForwardOnly {
        fn sync_forward(&self, _request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
            Ok(clock::now_minute())
        }

        fn sync_reverse(&self, _request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
            Err(SyncInvocationError::Failed("reverse unavailable".to_string()))
        }
    }

    fn store_with_tick(dir: &TempDir, tick_ms: u64) -> StateStore {
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                r#"
daemon:
  working_dir: .
  pid: sitesync.pid
  tick_ms: {tick_ms}
source:
  sites:
    alpha: {{ enabled: true, poll: {{ poll_interval: 60 }} }}
destination:
  sites:
    beta: {{ enabled: true, poll: {{ poll_interval: 60 }} }}
"#
            ),
        )
        .unwrap();
        StateStore::load(&path).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_during_tick_sleep_cleans_up_promptly() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tick(&dir, 10_000);
        let pidfile = store.pidfile_path();
        let origin = store.origin().to_path_buf();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let handle = tokio::spawn(run_until_shutdown(
            store,
            Arc::new(ForwardOnly),
            shutdown_rx,
        ));

        // Wait for the pidfile, then for the forward sync to be collected.
        let mut waited = Duration::ZERO;
        while !pidfile.exists() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(
            fs::read_to_string(&pidfile).unwrap(),
            format!("{}\n", std::process::id())
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cleanup must not wait for the next tick")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(!pidfile.exists(), "pidfile removed on shutdown");
        let reloaded = StateStore::load(&origin).unwrap();
        assert_eq!(reloaded.state().len(), 1, "only the successful direction is recorded");
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_task_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let handle = tokio::spawn(log_rotation_task(
            dir.path().to_path_buf(),
            Duration::from_secs(60),
            shutdown_rx,
        ));
        tokio::time::advance(Duration::from_secs(125)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
