//! Flush → reload tests for the persisted sync state.
//!
//! Each `#[case]` runs against its own temporary directory.

use chrono::{DateTime, TimeZone, Utc};
use rstest::rstest;
use sitesync_core::{PairDirectionKey, StateStore};
use tempfile::TempDir;

const DOC: &str = r#"
daemon:
  working_dir: /var/lib/sitesync
  pid: sitesync.pid
  checkpoint_secs: 300
hooks:
  forward: ["/usr/local/bin/push", "--verbose"]
source:
  sites:
    crits-prod:
      enabled: true
      poll:
        poll_interval: 60
        batch: 500
      url: https://crits.example/api
      api_key: s3cr3t
    アルファ:
      enabled: false
      poll:
        poll_interval: 120
destination:
  sites:
    edge:
      enabled: true
      poll:
        poll_interval: 300
      collection: inbox
notes: kept verbatim
state: {}
"#;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn load_fresh(dir: &TempDir) -> StateStore {
    let path = dir.path().join("sitesync.yaml");
    std::fs::write(&path, DOC).expect("write config");
    StateStore::load(&path).expect("load")
}

fn no_records() -> Vec<(PairDirectionKey, DateTime<Utc>)> {
    vec![]
}

fn both_directions() -> Vec<(PairDirectionKey, DateTime<Utc>)> {
    vec![
        (
            PairDirectionKey::forward("crits-prod".into(), "edge".into()),
            at(2024, 5, 1, 12, 34, 0),
        ),
        (
            PairDirectionKey::reverse("edge".into(), "crits-prod".into()),
            at(2024, 5, 1, 13, 0, 0),
        ),
    ]
}

fn unicode_and_disabled() -> Vec<(PairDirectionKey, DateTime<Utc>)> {
    vec![(
        PairDirectionKey::forward("アルファ".into(), "edge".into()),
        at(1999, 12, 31, 23, 59, 0),
    )]
}

fn overwritten() -> Vec<(PairDirectionKey, DateTime<Utc>)> {
    let key = PairDirectionKey::forward("crits-prod".into(), "edge".into());
    vec![
        (key.clone(), at(2024, 1, 1, 0, 0, 0)),
        (key, at(2024, 2, 1, 0, 0, 0)),
    ]
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("empty", no_records())]
#[case("both_directions", both_directions())]
#[case("unicode_and_disabled", unicode_and_disabled())]
#[case("overwritten", overwritten())]
fn flushed_state_reloads_identically(
    #[case] label: &str,
    #[case] records: Vec<(PairDirectionKey, DateTime<Utc>)>,
) {
    let dir = TempDir::new().expect("tempdir");
    let mut store = load_fresh(&dir);
    for (key, timestamp) in &records {
        store.record(key, *timestamp);
    }
    store
        .flush()
        .unwrap_or_else(|e| panic!("[{label}] flush failed: {e}"));

    let back = StateStore::load(store.origin())
        .unwrap_or_else(|e| panic!("[{label}] reload failed: {e}"));
    assert_eq!(store.state(), back.state(), "[{label}] state mapping");
    assert_eq!(store.config(), back.config(), "[{label}] whole document");
    for (key, _) in &records {
        assert_eq!(store.last_run(key), back.last_run(key), "[{label}] {key}");
    }
}

#[test]
fn flush_preserves_unknown_keys_and_minute_precision() {
    let dir = TempDir::new().expect("tempdir");
    let mut store = load_fresh(&dir);
    let key = PairDirectionKey::forward("crits-prod".into(), "edge".into());
    store.record(&key, at(2024, 5, 1, 12, 34, 56));
    store.flush().expect("flush");

    let written = std::fs::read_to_string(store.origin()).expect("read back");
    assert!(written.contains("api_key: s3cr3t"), "{written}");
    assert!(written.contains("batch: 500"), "{written}");
    assert!(written.contains("notes: kept verbatim"), "{written}");
    assert!(written.contains("crits-prod_to_edge"), "{written}");
    assert!(written.contains("source_to_destination"), "{written}");
    assert!(!written.contains("12:34:56"), "seconds must be dropped: {written}");

    let back = StateStore::load(store.origin()).expect("reload");
    assert_eq!(back.last_run(&key), Some(at(2024, 5, 1, 12, 34, 0)));
}

#[test]
fn redundant_flush_is_harmless() {
    let dir = TempDir::new().expect("tempdir");
    let mut store = load_fresh(&dir);
    store.flush().expect("first flush");
    let first = std::fs::read_to_string(store.origin()).expect("read");
    store.flush().expect("second flush");
    let second = std::fs::read_to_string(store.origin()).expect("read");
    assert_eq!(first, second);
}

#[cfg(unix)]
#[test]
fn flushed_document_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().expect("tempdir");
    let mut store = load_fresh(&dir);
    store.flush().expect("flush");
    let mode = std::fs::metadata(store.origin())
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}
