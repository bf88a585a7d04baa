//! `sitesync status`: daemon liveness and per-pair sync visibility.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use sitesync_core::{clock, is_due, schedule::enabled_pairs, StateStore};
use sitesync_daemon::{process_alive, read_pidfile};

use super::daemon::load_store;

/// Arguments for `sitesync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let store = load_store(config)?;
        let report = build_report(&store, clock::now_minute());
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    running: bool,
    pid: Option<i32>,
    pidfile: String,
    config: String,
    pairs: Vec<PairStatus>,
}

#[derive(Debug, Serialize)]
struct PairStatus {
    pair: String,
    direction: String,
    from: String,
    to: String,
    poll_interval_secs: u64,
    last_sync: Option<DateTime<Utc>>,
    due: bool,
}

#[derive(Tabled)]
struct PairTableRow {
    #[tabled(rename = "pair")]
    pair: String,
    #[tabled(rename = "direction")]
    direction: String,
    #[tabled(rename = "interval")]
    interval: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "due")]
    due: String,
}

/// `due` is judged at the minute of `now`, the granularity the scheduler ticks at.
fn build_report(store: &StateStore, now: DateTime<Utc>) -> StatusReport {
    let now = clock::truncate_to_minute(now);
    let pidfile = store.pidfile_path();
    // A malformed pidfile reads as "not running", as `stop` treats it.
    let pid = read_pidfile(&pidfile).ok().flatten();
    let running = pid
        .map(|pid| process_alive(pid).unwrap_or(false))
        .unwrap_or(false);

    let pairs = enabled_pairs(store.config())
        .into_iter()
        .map(|(key, interval)| {
            let last_sync = store.last_run(&key);
            PairStatus {
                pair: key.pair_label(),
                direction: key.direction.label().to_string(),
                from: key.from.to_string(),
                to: key.to.to_string(),
                poll_interval_secs: interval.as_secs(),
                last_sync,
                due: is_due(last_sync, interval, now),
            }
        })
        .collect();

    StatusReport {
        running,
        pid: pid.filter(|_| running),
        pidfile: pidfile.display().to_string(),
        config: store.origin().display().to_string(),
        pairs,
    }
}

fn print_table(report: StatusReport) {
    let state = if report.running {
        format!("running (pid {})", report.pid.unwrap_or_default())
            .green()
            .to_string()
    } else {
        "not running".red().to_string()
    };
    println!(
        "sitesync v{} | {} | {} pair-directions",
        env!("CARGO_PKG_VERSION"),
        state,
        report.pairs.len(),
    );
    println!("config: {}", report.config);

    if report.pairs.is_empty() {
        println!("No enabled site pairs.");
        return;
    }

    let now = Utc::now();
    let rows: Vec<PairTableRow> = report
        .pairs
        .into_iter()
        .map(|pair| PairTableRow {
            pair: pair.pair,
            direction: pair.direction,
            interval: format_seconds(pair.poll_interval_secs),
            last_sync: pair
                .last_sync
                .map(|at| format!("{} ago", format_seconds(age_secs(at, now))))
                .unwrap_or_else(|| "never".to_string()),
            due: if pair.due {
                "yes".yellow().to_string()
            } else {
                "no".to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn age_secs(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    now.signed_duration_since(at).num_seconds().max(0) as u64
}

fn format_seconds(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h", s / (60 * 60)),
        s => format!("{}d", s / (60 * 60 * 24)),
    }
}
