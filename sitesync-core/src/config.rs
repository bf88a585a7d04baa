//! Typed configuration document.
//!
//! The same YAML document carries the daemon settings, both site collections
//! and the persisted sync state. It is validated once at load; keys the schema
//! does not know about are kept in `extra` maps so a flush writes them back
//! unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::state::SyncState;
use crate::types::{Direction, PairDirectionKey, Role, SiteId};

pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Root of the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    #[serde(default, skip_serializing_if = "HookSettings::is_empty")]
    pub hooks: HookSettings,
    pub source: SiteCollection,
    pub destination: SiteCollection,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: SyncState,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `daemon:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Directory the daemon changes into; holds the pidfile and log files.
    pub working_dir: PathBuf,
    /// Pidfile name, relative to `working_dir`.
    pub pid: String,
    /// Keep the standard streams attached (no redirection after detaching).
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DaemonSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.unwrap_or(DEFAULT_TICK_MS))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(
            self.shutdown_grace_secs
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        )
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS))
    }

    /// Periodic flush cadence; `None` means flush only at shutdown.
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// `hooks:` section, the external commands run by the hook invoker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl HookSettings {
    pub fn is_empty(&self) -> bool {
        self.forward.is_none() && self.reverse.is_none() && self.timeout_secs.is_none()
    }

    pub fn command(&self, direction: Direction) -> Option<&[String]> {
        match direction {
            Direction::SourceToDestination => self.forward.as_deref(),
            Direction::DestinationToSource => self.reverse.as_deref(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// One system class: `source:` or `destination:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteCollection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sites: BTreeMap<SiteId, SiteConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SiteCollection {
    pub fn enabled(&self) -> impl Iterator<Item = (&SiteId, &SiteConfig)> {
        self.sites.iter().filter(|(_, site)| site.enabled)
    }
}

/// A single site entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub enabled: bool,
    pub poll: PollSettings,
    /// Direction-specific settings (endpoints, credentials, ...) for the sync hooks.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SiteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.poll_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Minimum seconds between two syncs this site originates.
    pub poll_interval: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DaemonConfig {
    pub fn sites(&self, role: Role) -> &SiteCollection {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }

    /// Check the schema constraints serde cannot express.
    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        if self.daemon.working_dir.as_os_str().is_empty() {
            return Err(invalid("daemon.working_dir must not be empty".to_string()));
        }
        let pid = self.daemon.pid.as_str();
        if pid.trim().is_empty() || Path::new(pid).file_name().map(|n| n != pid).unwrap_or(true) {
            return Err(invalid(format!(
                "daemon.pid must be a bare file name, got '{}'",
                self.daemon.pid
            )));
        }
        if self.daemon.tick_ms == Some(0) {
            return Err(invalid("daemon.tick_ms must be at least 1".to_string()));
        }

        for direction in Direction::all() {
            if let Some(command) = self.hooks.command(direction) {
                if command.is_empty() || command[0].trim().is_empty() {
                    return Err(invalid(format!(
                        "hooks for {direction} must name a program"
                    )));
                }
            }
        }

        for role in [Role::Source, Role::Destination] {
            for (id, site) in &self.sites(role).sites {
                if id.0.is_empty() || id.0.contains('/') {
                    return Err(invalid(format!("invalid {role} site id '{id}'")));
                }
                if site.poll.poll_interval == 0 {
                    return Err(invalid(format!(
                        "{role}.sites.{id}.poll.poll_interval must be at least 1 second"
                    )));
                }
            }
        }

        // Records are stored under `<from>_to_<to>`, so two pairs of the same
        // direction must never share a label.
        for direction in Direction::all() {
            let mut labels: BTreeMap<String, PairDirectionKey> = BTreeMap::new();
            for from in self.sites(direction.authority()).sites.keys() {
                for to in self.sites(direction.counterpart()).sites.keys() {
                    let key = PairDirectionKey::new(from.clone(), to.clone(), direction);
                    if let Some(previous) = labels.insert(key.pair_label(), key.clone()) {
                        return Err(invalid(format!(
                            "pairs {}/{} and {}/{} share the label '{}' for {direction}",
                            previous.from,
                            previous.to,
                            key.from,
                            key.to,
                            key.pair_label()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Read, parse and validate the document at `path`.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_config(path, &contents)
}

/// Parse and validate `contents`; `path` is only used for error context.
pub fn parse_config(path: &Path, contents: &str) -> Result<DaemonConfig, ConfigError> {
    let config: DaemonConfig =
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate(path)?;
    Ok(config)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
