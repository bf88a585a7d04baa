//! Due-check properties and planning scenarios.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rstest::rstest;
use sitesync_core::{
    clock, config::parse_config, due_pairs, is_due, DaemonConfig, Direction, PairDirectionKey,
    SyncState,
};

fn config(yaml: &str) -> DaemonConfig {
    parse_config(Path::new("test.yaml"), yaml).expect("valid config")
}

fn two_sites(alpha_enabled: bool, beta_interval: u64) -> DaemonConfig {
    config(&format!(
        r#"
daemon:
  working_dir: /tmp/sitesync
  pid: sitesync.pid
source:
  sites:
    alpha:
      enabled: {alpha_enabled}
      poll:
        poll_interval: 60
destination:
  sites:
    beta:
      enabled: true
      poll:
        poll_interval: {beta_interval}
"#
    ))
}

fn epoch_plus(secs: i64) -> DateTime<Utc> {
    clock::epoch() + TimeDelta::seconds(secs)
}

// ---------------------------------------------------------------------------
// 1. is_due properties
// ---------------------------------------------------------------------------

#[rstest]
#[case(1)]
#[case(60)]
#[case(3_600)]
#[case(86_400)]
fn never_synced_pair_is_due_at_interval_after_epoch(#[case] interval: u64) {
    let now = epoch_plus(interval as i64);
    assert!(is_due(None, Duration::from_secs(interval), now));
    assert!(is_due(None, Duration::from_secs(interval), Utc::now()));
}

#[rstest]
#[case(0, false)]
#[case(1, false)]
#[case(59, false)]
#[case(60, true)]
#[case(61, true)]
#[case(86_400, true)]
fn recorded_pair_is_due_only_after_interval(#[case] offset: i64, #[case] expected: bool) {
    let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let now = last + TimeDelta::seconds(offset);
    assert_eq!(is_due(Some(last), Duration::from_secs(60), now), expected);
}

// ---------------------------------------------------------------------------
// 2. Planning scenarios
// ---------------------------------------------------------------------------

#[test]
fn first_forward_sync_is_planned_once() {
    let config = two_sites(true, 3_600);
    let due = due_pairs(&config, &SyncState::default(), epoch_plus(61));

    let forward: Vec<_> = due
        .iter()
        .filter(|d| d.key.direction == Direction::SourceToDestination)
        .collect();
    assert_eq!(forward.len(), 1);
    assert_eq!(
        forward[0].key,
        PairDirectionKey::forward("alpha".into(), "beta".into())
    );
    assert_eq!(forward[0].last_run, clock::epoch());

    // beta polls hourly; 61 s after the epoch its reverse pass is not due yet.
    assert!(due
        .iter()
        .all(|d| d.key.direction == Direction::SourceToDestination));
}

#[test]
fn recent_record_suppresses_forward_sync() {
    let config = two_sites(true, 3_600);
    // Half a minute past the boundary, so the record stays at exactly `now - 30s`.
    let now = clock::now_minute() + TimeDelta::seconds(30);
    let mut state = SyncState::default();
    state.insert(
        &PairDirectionKey::forward("alpha".into(), "beta".into()),
        now - TimeDelta::seconds(30),
    );
    let due = due_pairs(&config, &state, now);
    assert!(due
        .iter()
        .all(|d| d.key.direction != Direction::SourceToDestination));
}

#[test]
fn reverse_direction_uses_destination_interval() {
    let config = two_sites(true, 600);
    let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut state = SyncState::default();
    let fwd = PairDirectionKey::forward("alpha".into(), "beta".into());
    let rev = PairDirectionKey::reverse("beta".into(), "alpha".into());
    state.insert(&fwd, last);
    state.insert(&rev, last);

    // 5 minutes later: alpha's 60 s interval elapsed, beta's 600 s has not.
    let due = due_pairs(&config, &state, last + TimeDelta::minutes(5));
    let keys: Vec<_> = due.iter().map(|d| d.key.clone()).collect();
    assert_eq!(keys, vec![fwd.clone()]);

    let due = due_pairs(&config, &state, last + TimeDelta::minutes(10));
    let keys: Vec<_> = due.iter().map(|d| d.key.clone()).collect();
    assert_eq!(keys, vec![fwd, rev]);
}

#[test]
fn disabled_sites_are_never_planned() {
    let config = two_sites(false, 60);
    let due = due_pairs(&config, &SyncState::default(), Utc::now());
    assert!(due.is_empty(), "got: {due:?}");
}

#[test]
fn every_enabled_combination_is_planned_in_both_directions() {
    let config = config(
        r#"
daemon:
  working_dir: /tmp/sitesync
  pid: sitesync.pid
source:
  sites:
    a1: { enabled: true, poll: { poll_interval: 60 } }
    a2: { enabled: true, poll: { poll_interval: 60 } }
destination:
  sites:
    b1: { enabled: true, poll: { poll_interval: 60 } }
    b2: { enabled: true, poll: { poll_interval: 60 } }
    b3: { enabled: false, poll: { poll_interval: 60 } }
"#,
    );
    let due = due_pairs(&config, &SyncState::default(), Utc::now());
    let labels: Vec<String> = due.iter().map(|d| d.key.pair_label()).collect();
    assert_eq!(
        labels,
        vec![
            "a1_to_b1", "a1_to_b2", "a2_to_b1", "a2_to_b2", "b1_to_a1", "b1_to_a2", "b2_to_a1",
            "b2_to_a2",
        ]
    );
}
