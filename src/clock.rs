//! Helpers for the timestamps stored by the ledger.
//!
//! Every timestamp is kept in UTC with the sub-second part dropped so that the text written to
//! SQLite sorts and compares the same way the [OffsetDateTime] values do.

use time::{OffsetDateTime, UtcOffset};

/// The current time in UTC, truncated to whole seconds.
pub fn now_utc() -> OffsetDateTime {
    normalize(OffsetDateTime::now_utc())
}

/// Convert `timestamp` to UTC and truncate it to whole seconds.
pub fn normalize(timestamp: OffsetDateTime) -> OffsetDateTime {
    let timestamp = timestamp.to_offset(UtcOffset::UTC);

    timestamp
        .replace_nanosecond(0)
        .unwrap_or(timestamp)
}
