use chrono::{NaiveTime, Timelike};

/// Duration used whenever a session length cannot be recovered.
pub const DEFAULT_SESSION_MINUTES: u32 = 60;

/// Session length between two same-day clock times, falling back to
/// [`DEFAULT_SESSION_MINUTES`] when the span is zero or negative.
pub fn session_minutes(start: NaiveTime, end: NaiveTime) -> u32 {
    let start_minutes = i64::from(start.hour() * 60 + start.minute());
    let end_minutes = i64::from(end.hour() * 60 + end.minute());
    let duration = end_minutes - start_minutes;

    if duration > 0 {
        duration as u32
    } else {
        DEFAULT_SESSION_MINUTES
    }
}

/// A stored or supplied session length, with zero replaced by
/// [`DEFAULT_SESSION_MINUTES`].
pub fn effective_session_minutes(minutes: u32) -> u32 {
    if minutes > 0 {
        minutes
    } else {
        DEFAULT_SESSION_MINUTES
    }
}

/// Parses an `HH:MM` clock value.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Resolves optional textual start/end times. Missing or unparsable input
/// yields the default duration rather than an error.
pub fn resolve_session_minutes(start: Option<&str>, end: Option<&str>) -> u32 {
    match (start.and_then(parse_clock), end.and_then(parse_clock)) {
        (Some(start), Some(end)) => session_minutes(start, end),
        _ => DEFAULT_SESSION_MINUTES,
    }
}
