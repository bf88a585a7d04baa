//! Due-check planning.
//!
//! Each direction is gated by its polling authority: the source site's
//! interval gates `source_to_destination`, the destination site's interval
//! gates `destination_to_source`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::epoch;
use crate::config::{DaemonConfig, SiteConfig};
use crate::state::SyncState;
use crate::types::{Direction, PairDirectionKey};

/// A pair-direction whose interval has elapsed at planning time.
#[derive(Debug, Clone, PartialEq)]
pub struct DueSync {
    pub key: PairDirectionKey,
    pub from_site: SiteConfig,
    pub to_site: SiteConfig,
    /// Last successful sync, or the epoch if never synced.
    pub last_run: DateTime<Utc>,
}

/// `now >= last_run + poll_interval`, with a missing record treated as the epoch.
pub fn is_due(last_run: Option<DateTime<Utc>>, poll_interval: Duration, now: DateTime<Utc>) -> bool {
    let last_run = last_run.unwrap_or_else(epoch);
    let interval = TimeDelta::from_std(poll_interval).unwrap_or(TimeDelta::MAX);
    match last_run.checked_add_signed(interval) {
        Some(next) => now >= next,
        None => false,
    }
}

/// Every enabled pair-direction that is due at `now`, forward pass first.
pub fn due_pairs(config: &DaemonConfig, state: &SyncState, now: DateTime<Utc>) -> Vec<DueSync> {
    let mut due = Vec::new();
    for direction in Direction::all() {
        let authorities = config.sites(direction.authority());
        let counterparts = config.sites(direction.counterpart());
        for (from, from_site) in authorities.enabled() {
            for (to, to_site) in counterparts.enabled() {
                let key = PairDirectionKey::new(from.clone(), to.clone(), direction);
                let last_run = state.get(&key).map(|record| record.timestamp);
                if is_due(last_run, from_site.poll_interval(), now) {
                    due.push(DueSync {
                        key,
                        from_site: from_site.clone(),
                        to_site: to_site.clone(),
                        last_run: last_run.unwrap_or_else(epoch),
                    });
                }
            }
        }
    }
    due
}

/// All enabled pair-directions, due or not, as `(key, poll_interval)`.
pub fn enabled_pairs(config: &DaemonConfig) -> Vec<(PairDirectionKey, Duration)> {
    let mut pairs = Vec::new();
    for direction in Direction::all() {
        for (from, from_site) in config.sites(direction.authority()).enabled() {
            for (to, _) in config.sites(direction.counterpart()).enabled() {
                pairs.push((
                    PairDirectionKey::new(from.clone(), to.clone(), direction),
                    from_site.poll_interval(),
                ));
            }
        }
    }
    pairs
}
