//! Shared timestamp helpers for snapshot names, manifests, and event envelopes.

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use ulid::Ulid;

/// RFC 3339 UTC with nanoseconds, e.g. `2026-10-19T08:12:44.123456789Z`.
pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Fixed-width local stamp used as the snapshot name prefix: `YYYYMMDD_HHMMSS_mmm`.
pub fn name_stamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Local wall-clock `HH:MM:SS` for operator log lines.
pub fn clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Local `YYYY-MM-DD HH:MM:SS` for the running snapshot log.
pub fn log_stamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parses a manifest `created_at`.
///
/// Accepts RFC 3339 and the older `YYYY-MM-DD HH:MM:SS` local form.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    local_to_utc(naive)
}

/// Recovers the capture time from a snapshot name's `YYYYMMDD_HHMMSS` prefix.
pub fn parse_name_stamp(name: &str) -> Option<DateTime<Utc>> {
    let prefix = name.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(prefix, "%Y%m%d_%H%M%S").ok()?;
    let base = local_to_utc(naive)?;
    // Millisecond suffix when present: `_mmm_`.
    let millis = name
        .get(15..19)
        .and_then(|s| s.strip_prefix('_'))
        .filter(|s| s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);
    Some(base + chrono::Duration::milliseconds(millis))
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}
