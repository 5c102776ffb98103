use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Current instant in the storage format: RFC 3339, millisecond precision, `Z` suffix.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored ISO-8601 timestamp. Offsets other than `Z` are accepted and
/// converted to UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Storage form of an input timestamp. Accepts RFC 3339 with any offset or a
/// calendar date (`YYYY-MM-DD`, taken as midnight UTC).
pub fn normalize_iso(value: &str) -> Option<String> {
    let instant = parse_iso(value).or_else(|| {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
    })?;
    Some(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_round_trips() {
        let now = now_iso();
        assert!(now.ends_with('Z'));
        let parsed = parse_iso(&now).expect("parse now");
        assert!(parsed.timestamp_millis() > 1_500_000_000_000); // after 2017
    }

    #[test]
    fn parse_iso_rejects_free_text() {
        assert!(parse_iso("Office supplies").is_none());
        assert!(parse_iso("2025-03-01").is_none());
        assert!(parse_iso("2025-03-01T00:00:00Z").is_some());
        assert!(parse_iso("2025-03-01T02:00:00+02:00").is_some());
    }

    #[test]
    fn normalize_iso_stores_utc_millis() {
        assert_eq!(
            normalize_iso("2025-03-01T02:00:00+02:00").as_deref(),
            Some("2025-03-01T00:00:00.000Z")
        );
        assert_eq!(normalize_iso("2025-03-01").as_deref(), Some("2025-03-01T00:00:00.000Z"));
        assert_eq!(
            normalize_iso(" 2025-03-01T10:15:30.5Z ").as_deref(),
            Some("2025-03-01T10:15:30.500Z")
        );
        assert_eq!(normalize_iso("2025-13-01"), None);
        assert_eq!(normalize_iso("Office supplies"), None);
    }
}
