//! Persistent sync state.
//!
//! # Storage layout
//!
//! Sync records live in the `state:` section of the configuration document,
//! keyed by pair label and then by direction label:
//!
//! ```text
//! state:
//!   alpha_to_beta:
//!     source_to_destination:
//!       timestamp: 2024-05-01T12:34:00Z
//! ```
//!
//! A record only exists once its pair-direction synced successfully.
//! [`StateStore::flush`] rewrites the whole document atomically
//! (`<file>.tmp` sibling, then `rename`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::truncate_to_minute;
use crate::config::{load_config, DaemonConfig};
use crate::error::{persist_io, ConfigError, PersistenceError};
use crate::types::{Direction, PairDirectionKey, SyncRecord};

/// In-memory mapping of pair label → direction → last successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState(BTreeMap<String, BTreeMap<Direction, SyncRecord>>);

impl SyncState {
    pub fn get(&self, key: &PairDirectionKey) -> Option<&SyncRecord> {
        self.0.get(&key.pair_label())?.get(&key.direction)
    }

    /// Insert or overwrite the record for `key`, truncated to the minute.
    pub fn insert(&mut self, key: &PairDirectionKey, timestamp: DateTime<Utc>) {
        self.0.entry(key.pair_label()).or_default().insert(
            key.direction,
            SyncRecord {
                timestamp: truncate_to_minute(timestamp),
            },
        );
    }

    /// Iterate `(pair_label, direction, record)` in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Direction, &SyncRecord)> {
        self.0.iter().flat_map(|(label, by_direction)| {
            by_direction
                .iter()
                .map(move |(direction, record)| (label.as_str(), *direction, record))
        })
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sub-minute precision and empty placeholder entries from loaded data.
    fn normalize(&mut self) {
        self.0.retain(|_, by_direction| !by_direction.is_empty());
        for record in self.0.values_mut().flat_map(BTreeMap::values_mut) {
            record.timestamp = truncate_to_minute(record.timestamp);
        }
    }
}

/// Owned daemon state: the configuration document, where it came from, and
/// the derived runtime paths.
#[derive(Debug, Clone)]
pub struct StateStore {
    config: DaemonConfig,
    origin: PathBuf,
    working_dir: PathBuf,
    dirty: bool,
}

impl StateStore {
    /// Load the document at `path`.
    ///
    /// The origin path is canonicalized and a relative `daemon.working_dir`
    /// is resolved against the document's directory, so both stay valid after
    /// the daemon changes directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let origin = std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_config(config, origin))
    }

    /// Wrap an already-parsed document whose origin is `origin`.
    pub fn from_config(mut config: DaemonConfig, origin: PathBuf) -> Self {
        config.state.normalize();
        let working_dir = if config.daemon.working_dir.is_absolute() {
            config.daemon.working_dir.clone()
        } else {
            origin
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&config.daemon.working_dir)
        };
        Self {
            config,
            origin,
            working_dir,
            dirty: false,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.config.state
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// `<working_dir>/<daemon.pid>`
    pub fn pidfile_path(&self) -> PathBuf {
        self.working_dir.join(&self.config.daemon.pid)
    }

    pub fn last_run(&self, key: &PairDirectionKey) -> Option<DateTime<Utc>> {
        self.config.state.get(key).map(|record| record.timestamp)
    }

    pub fn record(&mut self, key: &PairDirectionKey, timestamp: DateTime<Utc>) {
        self.config.state.insert(key, timestamp);
        self.dirty = true;
    }

    /// Whether records changed since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the document back to its origin.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        let yaml = serde_yaml::to_string(&self.config)?;
        let file_name = self
            .origin
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.yaml".to_string());
        let tmp = self.origin.with_file_name(format!("{file_name}.tmp"));

        std::fs::write(&tmp, yaml).map_err(|e| persist_io(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.origin).map_err(|e| persist_io(&self.origin, e))?;
        self.dirty = false;
        Ok(())
    }
}

// The document may carry hook credentials.
#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), PersistenceError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| persist_io(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), PersistenceError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const DOC: &str = r#"
daemon:
  working_dir: run
  pid: sitesync.pid
source:
  sites:
    alpha:
      enabled: true
      poll:
        poll_interval: 60
destination:
  sites:
    beta:
      enabled: true
      poll:
        poll_interval: 60
state:
  alpha_to_beta:
    source_to_destination:
      timestamp: 2024-05-01T12:34:56Z
  stale_to_entry: {}
"#;

    fn write_doc(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("sitesync.yaml");
        std::fs::write(&path, DOC).expect("write config");
        path
    }

    #[test]
    fn load_truncates_and_drops_empty_entries() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(&write_doc(&dir)).expect("load");
        assert_eq!(store.state().len(), 1);
        let key = PairDirectionKey::forward("alpha".into(), "beta".into());
        assert_eq!(
            store.last_run(&key),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 0).unwrap())
        );
        assert!(!store.is_dirty());
    }

    #[test]
    fn relative_working_dir_resolves_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(&write_doc(&dir)).expect("load");
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(store.working_dir(), canonical.join("run"));
        assert_eq!(store.pidfile_path(), canonical.join("run").join("sitesync.pid"));
    }

    #[test]
    fn record_marks_dirty_and_flush_clears_it() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::load(&write_doc(&dir)).expect("load");
        let key = PairDirectionKey::reverse("beta".into(), "alpha".into());
        store.record(&key, Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 42).unwrap());
        assert!(store.is_dirty());

        store.flush().expect("flush");
        assert!(!store.is_dirty());
        let tmp = dir.path().join("sitesync.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful flush");
    }

    #[test]
    fn record_does_not_touch_other_direction() {
        let mut state = SyncState::default();
        let fwd = PairDirectionKey::forward("a".into(), "b".into());
        let rev = PairDirectionKey::reverse("a".into(), "b".into());
        state.insert(&fwd, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(state.get(&fwd).is_some());
        assert!(state.get(&rev).is_none());
    }

    #[test]
    fn load_missing_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = StateStore::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    }
}
