//! UTC timestamp utilities (no chrono dependency).
//!
//! Timestamps are ISO-8601 UTC strings, which order lexicographically —
//! the stores rely on that for newest-first queries and for the
//! "now minus N days" window cutoffs.
//!
//! Unix-to-date conversion uses Howard Hinnant's civil_from_days.

use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 86400;

/// Current UTC time as Unix seconds.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current UTC timestamp in ISO-8601 format.
pub fn now_iso8601() -> String {
    unix_to_iso8601(now_unix_secs())
}

/// ISO-8601 timestamp for `days` whole days before now — the inclusive
/// lower bound of a time-window filter. Saturates at the Unix epoch.
pub fn days_ago_iso8601(days: u32) -> String {
    let cutoff = now_unix_secs().saturating_sub(u64::from(days) * SECS_PER_DAY);
    unix_to_iso8601(cutoff)
}

/// Convert Unix seconds to an ISO-8601 UTC string.
pub fn unix_to_iso8601(secs: u64) -> String {
    let days = (secs / SECS_PER_DAY) as i64;
    let time_of_day = secs % SECS_PER_DAY;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
