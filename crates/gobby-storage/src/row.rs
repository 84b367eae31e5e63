//! Row-mapping helpers shared by the per-entity stores.

use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Current time, formatted the way every timestamp column stores it.
#[must_use]
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a required timestamp column.
pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Read a timestamp column by name.
pub(crate) fn ts_column(row: &Row<'_>, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    Ok(parse_ts(&raw))
}

/// Read an optional timestamp column by name.
pub(crate) fn opt_ts_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(name)?;
    Ok(raw.map(|s| parse_ts(&s)))
}

/// Read a JSON column by name, defaulting when empty.
pub(crate) fn json_column<T: serde::de::DeserializeOwned + Default>(
    row: &Row<'_>,
    name: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_round_trip() {
        let stamp = now();
        let parsed = parse_ts(&stamp);
        assert_eq!(parsed.to_rfc3339(), stamp);
    }

    #[test]
    fn test_parse_ts_garbage_falls_back() {
        // Garbage yields "now" rather than an error; timestamps are
        // display data, not invariants.
        let parsed = parse_ts("not a time");
        assert!(parsed <= Utc::now());
    }
}
