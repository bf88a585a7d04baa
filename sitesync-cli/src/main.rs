//! sitesync: periodic bidirectional sync daemon between source and destination sites.
//!
//! # Usage
//!
//! ```text
//! sitesync [--config <path>] start [--foreground]
//! sitesync [--config <path>] stop
//! sitesync [--config <path>] restart [--foreground]
//! sitesync [--config <path>] status [--json]
//! ```

mod commands;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use commands::{daemon::StartArgs, status::StatusArgs};
use sitesync_daemon::{init_tracing, paths::default_config_path, LogFormat};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "sitesync",
    version,
    about = "Keep source and destination sites in sync on a schedule",
    long_about = None,
)]
struct Cli {
    /// Configuration document (default: <config dir>/sitesync/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon (detached unless --foreground).
    Start(StartArgs),

    /// Stop the running daemon and wait for it to exit.
    Stop,

    /// Stop the daemon if running, then start it again.
    Restart(StartArgs),

    /// Show daemon liveness and per-pair sync status.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Commands {
    /// Whether this command ends up writing to redirected log files.
    fn detaches(&self) -> bool {
        match self {
            Commands::Start(args) | Commands::Restart(args) => !args.foreground,
            Commands::Stop | Commands::Status(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ansi = std::io::stdout().is_terminal() && !cli.command.detaches();
    init_tracing(cli.log_format.into(), ansi);

    let config = resolve_config_path(cli.config)?;
    match cli.command {
        Commands::Start(args) => commands::daemon::start(&config, args),
        Commands::Stop => commands::daemon::stop(&config),
        Commands::Restart(args) => commands::daemon::restart(&config, args),
        Commands::Status(args) => args.run(&config),
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let config_dir = dirs::config_dir().context("could not determine the user config directory")?;
    Ok(default_config_path(&config_dir))
}
