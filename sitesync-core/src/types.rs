//! Domain types for sites, sync directions and sync records.
//!
//! All types are serializable via serde + serde_yaml.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a configured site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SiteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which system class a site belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Destination => write!(f, "destination"),
        }
    }
}

/// Sync direction between the two system classes.
///
/// The origin side of a direction is its polling authority: its own
/// `poll_interval` gates every pair it originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    SourceToDestination,
    DestinationToSource,
}

impl Direction {
    pub fn all() -> [Direction; 2] {
        [Direction::SourceToDestination, Direction::DestinationToSource]
    }

    /// Role of the site a sync in this direction reads from.
    pub fn authority(self) -> Role {
        match self {
            Direction::SourceToDestination => Role::Source,
            Direction::DestinationToSource => Role::Destination,
        }
    }

    /// Role of the site a sync in this direction writes to.
    pub fn counterpart(self) -> Role {
        match self {
            Direction::SourceToDestination => Role::Destination,
            Direction::DestinationToSource => Role::Source,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::SourceToDestination => "source_to_destination",
            Direction::DestinationToSource => "destination_to_source",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Keys and records
// ---------------------------------------------------------------------------

/// Identifies one ordered site pair in one direction.
///
/// `from` is always the polling authority: a source site for
/// [`Direction::SourceToDestination`], a destination site for
/// [`Direction::DestinationToSource`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairDirectionKey {
    pub from: SiteId,
    pub to: SiteId,
    pub direction: Direction,
}

impl PairDirectionKey {
    pub fn new(from: SiteId, to: SiteId, direction: Direction) -> Self {
        Self {
            from,
            to,
            direction,
        }
    }

    /// `<source>_to_<destination>` in the forward direction.
    pub fn forward(source: SiteId, destination: SiteId) -> Self {
        Self::new(source, destination, Direction::SourceToDestination)
    }

    /// `<destination>_to_<source>` in the reverse direction.
    pub fn reverse(destination: SiteId, source: SiteId) -> Self {
        Self::new(destination, source, Direction::DestinationToSource)
    }

    /// The persisted pair label, e.g. `alpha_to_beta`.
    pub fn pair_label(&self) -> String {
        format!("{}_to_{}", self.from, self.to)
    }
}

impl fmt::Display for PairDirectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_to_{}", self.from, self.to)
    }
}

/// Time of the last successful sync of one pair-direction (UTC, minute precision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
