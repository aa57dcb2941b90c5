use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::timestamp::parse_timestamp;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 50;
const MIN_LIMIT: usize = 1;

/// Offset applied to bare `YYYY-MM-DD` values of `since`.
pub const SINCE_DATE_OFFSET: &str = "+08:00";

static BARE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Query string of the listing endpoint. Kept as raw strings so bad values
/// fall back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<String>,
    pub since: Option<String>,
    pub url: Option<String>,
}

impl LatestQuery {
    /// Builds the query from decoded key/value pairs. The first value of a
    /// repeated key wins and unknown keys are ignored.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "limit" => &mut query.limit,
                "since" => &mut query.since,
                "url" => &mut query.url,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

/// Leading-integer parse clamped to `[1, 50]`. Missing or non-numeric input
/// gives the default of 20.
pub fn parse_limit(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return DEFAULT_LIMIT;
    };
    let raw = raw.trim();

    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };

    let leading: &str = &digits[..digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len())];
    if leading.is_empty() {
        return DEFAULT_LIMIT;
    }

    if negative {
        return MIN_LIMIT;
    }

    let value = leading.bytes().fold(0usize, |acc, b| {
        acc.saturating_mul(10).saturating_add(usize::from(b - b'0'))
    });
    value.clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Lower publish-time bound. Bare dates mean midnight at UTC+08:00; anything
/// unparseable means no bound.
pub fn parse_since(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if BARE_DATE.is_match(raw) {
        parse_timestamp(&format!("{raw}T00:00:00{SINCE_DATE_OFFSET}"))
    } else {
        parse_timestamp(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    mod limit_tests {
        use super::*;

        #[test]
        fn test_default_when_missing() {
            assert_eq!(parse_limit(None), 20);
        }

        #[test]
        fn test_default_when_not_numeric() {
            assert_eq!(parse_limit(Some("")), 20);
            assert_eq!(parse_limit(Some("abc")), 20);
            assert_eq!(parse_limit(Some("-")), 20);
            assert_eq!(parse_limit(Some("x10")), 20);
        }

        #[test]
        fn test_within_range() {
            assert_eq!(parse_limit(Some("1")), 1);
            assert_eq!(parse_limit(Some("10")), 10);
            assert_eq!(parse_limit(Some("50")), 50);
            assert_eq!(parse_limit(Some(" 15 ")), 15);
        }

        #[test]
        fn test_clamped_to_boundaries() {
            assert_eq!(parse_limit(Some("0")), 1);
            assert_eq!(parse_limit(Some("-5")), 1);
            assert_eq!(parse_limit(Some("51")), 50);
            assert_eq!(parse_limit(Some("1000")), 50);
            assert_eq!(parse_limit(Some("99999999999999999999999999")), 50);
        }

        #[test]
        fn test_leading_integer_with_trailing_garbage() {
            assert_eq!(parse_limit(Some("7abc")), 7);
            assert_eq!(parse_limit(Some("12.9")), 12);
            assert_eq!(parse_limit(Some("+3")), 3);
        }
    }

    mod since_tests {
        use super::*;

        #[test]
        fn test_bare_date_is_utc_plus_eight_midnight() {
            assert_eq!(
                parse_since(Some("2025-01-01")),
                Some(Utc.with_ymd_and_hms(2024, 12, 31, 16, 0, 0).unwrap())
            );
        }

        #[test]
        fn test_full_timestamp_keeps_its_offset() {
            assert_eq!(
                parse_since(Some("2025-01-01T00:00:00.000Z")),
                Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            );
        }

        #[test]
        fn test_unparseable_means_no_bound() {
            assert_eq!(parse_since(None), None);
            assert_eq!(parse_since(Some("")), None);
            assert_eq!(parse_since(Some("last tuesday")), None);
            assert_eq!(parse_since(Some("2025-02-30")), None);
        }
    }

    mod latest_query_tests {
        use super::*;

        #[test]
        fn test_empty_query() {
            let query: LatestQuery = serde_urlencoded::from_str("").unwrap();
            assert!(query.limit.is_none());
            assert!(query.since.is_none());
            assert!(query.url.is_none());
        }

        #[test]
        fn test_all_params() {
            let query: LatestQuery = serde_urlencoded::from_str(
                "limit=abc&since=2025-01-01&url=https%3A%2F%2Fevil.example%2Frss",
            )
            .unwrap();
            assert_eq!(parse_limit(query.limit.as_deref()), 20);
            assert!(parse_since(query.since.as_deref()).is_some());
            assert_eq!(query.url.as_deref(), Some("https://evil.example/rss"));
        }

        #[test]
        fn test_repeated_keys_keep_first_value() {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str("limit=1&limit=2&since=2025-01-01&utm=x&url=a&url=b")
                    .unwrap();
            let query = LatestQuery::from_pairs(pairs);
            assert_eq!(query.limit.as_deref(), Some("1"));
            assert_eq!(query.since.as_deref(), Some("2025-01-01"));
            assert_eq!(query.url.as_deref(), Some("a"));
        }
    }
}
