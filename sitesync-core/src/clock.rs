//! Minute-precision UTC clock.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Current UTC time truncated to the minute.
pub fn now_minute() -> DateTime<Utc> {
    truncate_to_minute(Utc::now())
}

/// Fixed reference instant used for pair-directions that never synced.
pub fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    // Only fails for instants outside chrono's nanosecond range.
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}
