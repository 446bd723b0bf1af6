//! Timestamp parsing, formatting, arithmetic, and index-name templating.
//!
//! Grounded on `elastalert.py`'s `ts_now`/`ts_to_dt`/`ts_add`/`ts_delta`/
//! `pretty_ts`/`format_index` call sites.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// The tick's single monotonic `now`, captured once per tick by the caller
/// and threaded through every comparison in that tick.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse an ISO 8601 timestamp, as used for `--start`/`--end` CLI overrides.
///
/// Rejects anything that isn't valid ISO 8601/RFC 3339.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid ISO 8601 timestamp {s:?}: {e}"))
}

/// Human-readable rendering for logs. `local` only affects display, never
/// query semantics — timezone conversion is a log-formatting concern only.
pub fn pretty_ts(ts: DateTime<Utc>, local: bool) -> String {
    if local {
        ts.with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    } else {
        ts.to_rfc3339()
    }
}

pub fn add(ts: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    ts + d
}

pub fn sub(ts: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    ts - d
}

/// Signed difference `a - b`.
pub fn delta(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    a - b
}

/// Strftime tokens recognized in an `index_pattern`. Only day-granularity
/// tokens are recognized; anything else in the pattern is passed through
/// literally.
const STRFTIME_TOKENS: &[&str] = &["%Y", "%m", "%d", "%H"];

fn pattern_is_tokenized(pattern: &str) -> bool {
    STRFTIME_TOKENS.iter().any(|t| pattern.contains(t))
}

/// Expand a strftime-tokenized index pattern into the set of daily index
/// names covering `[start, end]`, comma-joined. Patterns with
/// no tokens are returned unchanged (nothing to expand).
pub fn format_index(pattern: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    if !pattern_is_tokenized(pattern) {
        return pattern.to_string();
    }
    let start_day = start.date_naive();
    let end_day = end.date_naive();
    let mut names = Vec::new();
    let mut day = start_day;
    loop {
        names.push(format_one_day(pattern, day));
        if day >= end_day {
            break;
        }
        day = day.succ_opt().expect("date overflow while expanding index pattern");
    }
    names.join(",")
}

fn format_one_day(pattern: &str, day: NaiveDate) -> String {
    // chrono's `format` understands the same `%Y`/`%m`/`%d` tokens the
    // pattern already uses, so the whole pattern can be handed to it.
    day.format(pattern).to_string()
}

/// Replace the tokenized portion of an index pattern with `*` when no
/// interval is known.
pub fn wildcard_index(pattern: &str) -> String {
    if !pattern_is_tokenized(pattern) {
        return pattern.to_string();
    }
    let mut out = String::new();
    let mut last_copied = 0;
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() {
            out.push_str(&pattern[last_copied..i]);
            i += 2;
            last_copied = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&pattern[last_copied..]);
    // Collapse consecutive literal fragments left over from stripped tokens
    // into a single wildcard.
    if out.trim_matches(|c: char| c == '-' || c == '.').is_empty() {
        "*".to_string()
    } else {
        format!("{}*", out.trim_end_matches(['-', '.']))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parse_iso8601_roundtrip() {
        let ts = parse_iso8601("2026-07-28T12:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-07-28T12:00:00+00:00");
    }

    #[test]
    fn parse_iso8601_rejects_garbage() {
        assert!(parse_iso8601("not-a-date").is_err());
    }

    #[test]
    fn delta_is_signed() {
        let a = dt("2026-01-01T00:01:00Z");
        let b = dt("2026-01-01T00:00:00Z");
        assert_eq!(delta(a, b), Duration::minutes(1));
        assert_eq!(delta(b, a), Duration::minutes(-1));
    }

    #[test]
    fn add_sub_are_inverse() {
        let ts = dt("2026-01-01T00:00:00Z");
        let d = Duration::minutes(15);
        assert_eq!(sub(add(ts, d), d), ts);
    }

    #[test]
    fn format_index_untokenized_passthrough() {
        let start = dt("2026-01-01T00:00:00Z");
        let end = dt("2026-01-03T00:00:00Z");
        assert_eq!(format_index("logs-static", start, end), "logs-static");
    }

    #[test]
    fn format_index_expands_daily_range() {
        let start = dt("2026-01-01T23:00:00Z");
        let end = dt("2026-01-03T01:00:00Z");
        let expanded = format_index("logs-%Y.%m.%d", start, end);
        assert_eq!(expanded, "logs-2026.01.01,logs-2026.01.02,logs-2026.01.03");
    }

    #[test]
    fn format_index_single_day() {
        let start = dt("2026-01-01T00:00:00Z");
        let end = dt("2026-01-01T23:59:59Z");
        assert_eq!(format_index("logs-%Y.%m.%d", start, end), "logs-2026.01.01");
    }

    #[test]
    fn wildcard_index_replaces_tokens() {
        assert_eq!(wildcard_index("logs-%Y.%m.%d"), "logs-*");
        assert_eq!(wildcard_index("logs-static"), "logs-static");
    }

    #[test]
    fn pretty_ts_utc_is_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        assert_eq!(pretty_ts(ts, false), ts.to_rfc3339());
    }
}
