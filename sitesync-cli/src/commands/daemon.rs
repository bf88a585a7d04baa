//! `sitesync start|stop|restart`: daemon process lifecycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use sitesync_core::StateStore;
use sitesync_daemon::{CommandInvoker, StartOptions, StopOutcome};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Stay in the foreground without redirecting output (for systemd/launchd).
    #[arg(long)]
    pub foreground: bool,
}

impl From<&StartArgs> for StartOptions {
    fn from(args: &StartArgs) -> Self {
        StartOptions {
            foreground: args.foreground,
        }
    }
}

pub(crate) fn load_store(config: &Path) -> Result<StateStore> {
    StateStore::load(config)
        .with_context(|| format!("failed to load configuration {}", config.display()))
}

pub fn start(config: &Path, args: StartArgs) -> Result<()> {
    let store = load_store(config)?;
    let invoker = Arc::new(CommandInvoker::new(store.config().hooks.clone()));
    sitesync_daemon::start(store, invoker, StartOptions::from(&args))
        .context("failed to start daemon")
}

pub fn stop(config: &Path) -> Result<()> {
    let store = load_store(config)?;
    let outcome = sitesync_daemon::stop(
        &store.pidfile_path(),
        store.config().daemon.stop_timeout(),
    )
    .context("failed to stop daemon")?;

    match outcome {
        StopOutcome::NotRunning => println!("daemon is not running"),
        StopOutcome::Stopped { pid } => println!("daemon stopped (pid {pid})"),
    }
    Ok(())
}

pub fn restart(config: &Path, args: StartArgs) -> Result<()> {
    sitesync_daemon::restart(config, StartOptions::from(&args)).context("failed to restart daemon")
}
