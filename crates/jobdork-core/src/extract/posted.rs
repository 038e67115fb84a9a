//! Posted-date parsing: relative expressions first, then absolute formats.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use regex::Regex;

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?P<n>\d+|an?|one)\s*\+?\s*(?P<unit>seconds?|secs?|minutes?|mins?|hours?|hrs?|h|days?|d|weeks?|wks?|w|months?|mos?|years?|yrs?|y)\s+ago\b",
    )
    .expect("hard-coded relative date regex")
});

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%b. %d, %Y",
];

/// Resolve posted-date text against `now`.
///
/// Unparsable text yields `None`; no default date is ever invented.
pub fn parse_posted_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_relative(trimmed, now).or_else(|| parse_absolute(trimmed))
}

fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if ["just now", "just posted", "today", "moments ago", "few seconds ago"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Some(now);
    }
    if lower.contains("yesterday") {
        return now.checked_sub_signed(TimeDelta::days(1));
    }
    find_relative_date(&lower, now)
}

/// Only the "N units ago" form, searched anywhere in longer text such as a snippet.
pub fn find_relative_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RELATIVE.captures(text)?;
    let n: i64 = match caps["n"].to_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        digits => digits.parse().ok()?,
    };
    let unit = caps["unit"].to_lowercase();
    let delta = match unit.trim_end_matches('s') {
        "second" | "sec" => TimeDelta::try_seconds(n)?,
        "minute" | "min" => TimeDelta::try_minutes(n)?,
        "hour" | "hr" | "h" => TimeDelta::try_hours(n)?,
        "day" | "d" => TimeDelta::try_days(n)?,
        "week" | "wk" | "w" => TimeDelta::try_weeks(n)?,
        "month" | "mo" => TimeDelta::try_days(n.checked_mul(30)?)?,
        "year" | "yr" | "y" => TimeDelta::try_days(n.checked_mul(365)?)?,
        _ => return None,
    };
    now.checked_sub_signed(delta)
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    let stripped = ["posted on", "posted:", "posted", "date posted:", "published"]
        .iter()
        .find_map(|prefix| {
            text.get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| &text[prefix.len()..])
        })
        .unwrap_or(text)
        .trim();

    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(stripped, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_days_ago() {
        let parsed = parse_posted_date("3 days ago", now()).unwrap();
        assert_eq!(parsed, now() - TimeDelta::days(3));
    }

    #[test]
    fn test_days_ago_against_wall_clock() {
        let now = Utc::now();
        let parsed = parse_posted_date("Posted 3 days ago", now).unwrap();
        let expected = Utc::now() - TimeDelta::days(3);
        assert!((expected - parsed).num_seconds().abs() < 5);
    }

    #[test]
    fn test_other_relative_units() {
        assert_eq!(
            parse_posted_date("2 weeks ago", now()).unwrap(),
            now() - TimeDelta::weeks(2)
        );
        assert_eq!(
            parse_posted_date("an hour ago", now()).unwrap(),
            now() - TimeDelta::hours(1)
        );
        assert_eq!(
            parse_posted_date("30+ days ago", now()).unwrap(),
            now() - TimeDelta::days(30)
        );
        assert_eq!(
            parse_posted_date("1 month ago", now()).unwrap(),
            now() - TimeDelta::days(30)
        );
        assert_eq!(parse_posted_date("Today", now()).unwrap(), now());
        assert_eq!(
            parse_posted_date("yesterday", now()).unwrap(),
            now() - TimeDelta::days(1)
        );
    }

    #[test]
    fn test_absolute_dates() {
        let iso = parse_posted_date("2024-05-01", now()).unwrap();
        assert_eq!((iso.year(), iso.month(), iso.day()), (2024, 5, 1));

        let long = parse_posted_date("Posted on March 5, 2024", now()).unwrap();
        assert_eq!((long.month(), long.day()), (3, 5));

        let rfc = parse_posted_date("2024-06-01T08:30:00Z", now()).unwrap();
        assert_eq!(rfc.day(), 1);
    }

    #[test]
    fn test_unparsable_returns_none() {
        assert!(parse_posted_date("sometime soon", now()).is_none());
        assert!(parse_posted_date("", now()).is_none());
        assert!(parse_posted_date("13/45/2024", now()).is_none());
    }
}
