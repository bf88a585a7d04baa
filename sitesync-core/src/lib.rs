//! sitesync core library: domain types, configuration, sync state, scheduling.
//!
//! - [`types`]: site ids, directions, pair-direction keys
//! - [`config`]: typed configuration document, validated at load
//! - [`state`]: [`StateStore`], persisted sync records
//! - [`schedule`]: due-check planning
//! - [`clock`]: minute-precision UTC clock
//! - [`invoker`]: [`SyncInvoker`] boundary to the sync routines

pub mod clock;
pub mod config;
pub mod error;
pub mod invoker;
pub mod schedule;
pub mod state;
pub mod types;

pub use config::{load_config, DaemonConfig, DaemonSettings, HookSettings, SiteCollection, SiteConfig};
pub use error::{ConfigError, PersistenceError, SyncInvocationError};
pub use invoker::{SyncInvoker, SyncRequest};
pub use schedule::{due_pairs, is_due, DueSync};
pub use state::{StateStore, SyncState};
pub use types::{Direction, PairDirectionKey, Role, SiteId, SyncRecord};
