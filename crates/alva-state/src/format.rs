//! Human-readable renderings of timestamps and durations.

use chrono::{DateTime, Local, Utc};

/// "just now", "12 min ago", "3 h ago", "yesterday", "4 days ago".
///
/// Timestamps in the future read as "just now".
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes} min ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} h ago");
    }
    match hours / 24 {
        1 => "yesterday".to_string(),
        days => format!("{days} days ago"),
    }
}

/// "45 min", "2 h", "1 h 30 min".
pub fn duration_minutes(minutes: u32) -> String {
    if minutes < 60 {
        return format!("{minutes} min");
    }
    let (hours, rest) = (minutes / 60, minutes % 60);
    if rest == 0 {
        format!("{hours} h")
    } else {
        format!("{hours} h {rest} min")
    }
}

/// "850ms" under a second, else seconds to one decimal ("1.5s").
pub fn duration_ms(ms: u64) -> String {
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let tenths = (ms + 50) / 100;
    format!("{}.{}s", tenths / 10, tenths % 10)
}

/// Wall-clock "HH:MM" in the local timezone.
pub fn clock_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}
