//! Clock helpers and relative time formatting.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::Timestamp;

/// Current time in seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or(0)
}

const UNITS: [(&str, u64); 4] = [("day", 86_400), ("hour", 3_600), ("minute", 60), ("second", 1)];

/// Render an age in seconds as e.g. `2 hours, 3 minutes ago`.
///
/// Shows the two most significant non-zero units.
#[must_use]
pub fn time_ago(seconds: u64) -> String {
    if seconds == 0 {
        return "just now".to_string();
    }
    format!("{} ago", duration(seconds))
}

/// Render a span in seconds as e.g. `1 day, 5 seconds`.
#[must_use]
pub fn duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0 seconds".to_string();
    }

    let mut rest = seconds;
    let mut parts = Vec::with_capacity(2);
    for (name, size) in UNITS {
        let amount = rest / size;
        rest %= size;
        if amount > 0 {
            let plural = if amount == 1 { "" } else { "s" };
            parts.push(format!("{amount} {name}{plural}"));
        }
        if parts.len() == 2 {
            break;
        }
    }

    parts.join(", ")
}

/// Age of `timestamp` relative to `now`, clamped at zero.
#[must_use]
pub fn age(timestamp: Timestamp, now: Timestamp) -> u64 {
    u64::try_from(now.saturating_sub(timestamp)).unwrap_or(0)
}
