//! # Date Handling
//!
//! Stored dates are naive timestamps in two zones: site-local and GMT.
//! The site offset is configured in whole minutes.

use chrono::{DateTime, NaiveDateTime, TimeDelta};

/// Output format for every date field in responses.
pub const RESPONSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A parsed input date. When `has_offset` is set, `naive` is already GMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub naive: NaiveDateTime,
    pub has_offset: bool,
}

/// Parse an RFC3339-like date. The offset is optional, the separator may be
/// `T` or a space, and fractional seconds are accepted.
pub fn parse_date(input: &str) -> Option<ParsedDate> {
    let mut normalized: String = input.trim().to_string();
    if normalized.len() > 10 && normalized.is_char_boundary(10) && normalized.is_char_boundary(11)
    {
        let sep = &normalized[10..11];
        if sep == " " || sep == "t" {
            normalized.replace_range(10..11, "T");
        }
    }
    if normalized.ends_with('z') {
        normalized.pop();
        normalized.push('Z');
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(ParsedDate {
            naive: dt.naive_utc(),
            has_offset: true,
        });
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| ParsedDate {
            naive,
            has_offset: false,
        })
}

/// Local and GMT pair for an input date.
///
/// Inputs with an explicit offset are converted exactly. Offset-less inputs
/// are read as GMT when `is_utc` is set and as site-local otherwise.
pub fn date_with_gmt(
    input: &str,
    is_utc: bool,
    offset_minutes: i32,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let parsed = parse_date(input)?;
    if parsed.has_offset || is_utc {
        let gmt = parsed.naive;
        Some((to_local(gmt, offset_minutes), gmt))
    } else {
        let local = parsed.naive;
        Some((local, to_gmt(local, offset_minutes)))
    }
}

pub fn to_local(gmt: NaiveDateTime, offset_minutes: i32) -> NaiveDateTime {
    gmt + TimeDelta::minutes(i64::from(offset_minutes))
}

pub fn to_gmt(local: NaiveDateTime, offset_minutes: i32) -> NaiveDateTime {
    local - TimeDelta::minutes(i64::from(offset_minutes))
}

pub fn format_date(dt: NaiveDateTime) -> String {
    dt.format(RESPONSE_FORMAT).to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_offset() {
        let a = parse_date("2017-02-14T10:00:00+02:00").expect("offset date");
        assert!(a.has_offset);
        assert_eq!(format_date(a.naive), "2017-02-14T08:00:00");

        let b = parse_date("2017-02-14 10:00:00").expect("space separated");
        assert!(!b.has_offset);
        assert_eq!(format_date(b.naive), "2017-02-14T10:00:00");

        assert!(parse_date("2017-02-14").is_none());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn local_input_shifts_by_site_offset() {
        let (local, gmt) = date_with_gmt("2020-01-01T12:00:00", false, 120).expect("date");
        assert_eq!(format_date(local), "2020-01-01T12:00:00");
        assert_eq!(format_date(gmt), "2020-01-01T10:00:00");

        let (local, gmt) = date_with_gmt("2020-01-01T12:00:00", true, 120).expect("date");
        assert_eq!(format_date(local), "2020-01-01T14:00:00");
        assert_eq!(format_date(gmt), "2020-01-01T12:00:00");
    }
}
