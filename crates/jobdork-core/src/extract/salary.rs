//! Salary text parsing.
//!
//! Patterns are tried in order and the first match wins: a range
//! (`$50,000 - $75,000`, `€40k–50k`, `60 to 80k GBP`) before a single amount
//! (`$25/hour`, `€45,000`, `90k USD`). At least one currency marker is
//! required so that "5-7 years" is never read as pay. The pay period is read
//! from the few characters right after the amount.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::{Salary, SalaryPeriod};

const AMOUNT: &str = r"\d[\d,]*(?:\.\d+)?";
const SYMBOL: &str = r"[$€£¥₹]";
const CODE: &str = r"\b(?i:usd|eur|gbp|cad|aud|chf|inr|jpy)\b";

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<pre>{SYMBOL}|{CODE})?\s*(?P<min>{AMOUNT})\s*(?P<mink>[kK])?\s*(?:-|–|—|to)\s*(?P<pre2>{SYMBOL}|{CODE})?\s*(?P<max>{AMOUNT})\s*(?P<maxk>[kK])?\b\s*(?P<post>{CODE})?"
    ))
    .expect("hard-coded salary range regex")
});

static SINGLE_PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<pre>{SYMBOL}|{CODE})\s*(?P<amount>{AMOUNT})\s*(?P<k>[kK])?\b"
    ))
    .expect("hard-coded salary regex")
});

static SINGLE_SUFFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<amount>{AMOUNT})\s*(?P<k>[kK])?\s*(?P<post>{CODE}|{SYMBOL})"
    ))
    .expect("hard-coded salary regex")
});

/// How far past the amount a period keyword may appear, in chars.
const PERIOD_WINDOW: usize = 24;

const PERIODS: &[(SalaryPeriod, &[&str])] = &[
    (
        SalaryPeriod::Hourly,
        &["per hour", "/hour", "/hr", "an hour", "hourly", "p/h", "ph"],
    ),
    (SalaryPeriod::Daily, &["per day", "/day", "a day", "daily"]),
    (
        SalaryPeriod::Weekly,
        &["per week", "/week", "/wk", "a week", "weekly"],
    ),
    (
        SalaryPeriod::Monthly,
        &["per month", "/month", "/mo", "a month", "monthly"],
    ),
    (
        SalaryPeriod::Yearly,
        &[
            "per year", "/year", "/yr", "a year", "yearly", "annually", "annual", "per annum",
            "p.a.",
        ],
    ),
];

/// Parse free salary text. Returns `None` when no pattern matches.
pub fn parse_salary(text: &str) -> Option<Salary> {
    parse_range(text)
        .or_else(|| parse_single(&SINGLE_PREFIXED, text))
        .or_else(|| parse_single(&SINGLE_SUFFIXED, text))
}

fn parse_range(text: &str) -> Option<Salary> {
    for caps in RANGE.captures_iter(text) {
        let currency = ["pre", "pre2", "post"]
            .iter()
            .find_map(|name| caps.name(name).and_then(|m| currency_code(m.as_str())));
        let Some(currency) = currency else {
            continue;
        };

        let max_k = caps.name("maxk").is_some();
        // "40-50k" scales both ends.
        let min_k = caps.name("mink").is_some() || max_k;
        let min = amount(&caps, "min", min_k)?;
        let max = amount(&caps, "max", max_k)?;
        if min <= 0.0 || max < min {
            continue;
        }
        return Some(Salary {
            min,
            max,
            currency,
            period: period_after(text, caps.get(0).map_or(text.len(), |m| m.end())),
        });
    }
    None
}

fn parse_single(pattern: &Regex, text: &str) -> Option<Salary> {
    for caps in pattern.captures_iter(text) {
        let currency = ["pre", "post"]
            .iter()
            .find_map(|name| caps.name(name).and_then(|m| currency_code(m.as_str())));
        let Some(currency) = currency else {
            continue;
        };
        let value = amount(&caps, "amount", caps.name("k").is_some())?;
        if value <= 0.0 {
            continue;
        }
        return Some(Salary {
            min: value,
            max: value,
            currency,
            period: period_after(text, caps.get(0).map_or(text.len(), |m| m.end())),
        });
    }
    None
}

fn amount(caps: &Captures<'_>, name: &str, thousands: bool) -> Option<f64> {
    let raw = caps.name(name)?.as_str().replace(',', "");
    let value: f64 = raw.parse().ok()?;
    Some(if thousands { value * 1000.0 } else { value })
}

fn currency_code(marker: &str) -> Option<String> {
    let code = match marker.trim() {
        "$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        "₹" => "INR",
        other if other.len() == 3 && other.chars().all(|c| c.is_ascii_alphabetic()) => {
            return Some(other.to_ascii_uppercase());
        }
        _ => return None,
    };
    Some(code.to_string())
}

fn period_after(text: &str, end: usize) -> SalaryPeriod {
    let window: String = text
        .get(end..)
        .unwrap_or_default()
        .chars()
        .take(PERIOD_WINDOW)
        .collect();
    detect_period(&window)
}

/// The first pay period named in the text, defaulting to yearly.
pub fn detect_period(text: &str) -> SalaryPeriod {
    let lower = text.to_lowercase();
    PERIODS
        .iter()
        .flat_map(|(period, keywords)| keywords.iter().map(move |k| (*period, *k)))
        .filter_map(|(period, keyword)| keyword_position(&lower, keyword).map(|i| (i, period)))
        .min_by_key(|(i, _)| *i)
        .map(|(_, period)| period)
        .unwrap_or(SalaryPeriod::Yearly)
}

/// Byte offset of `keyword` in `lower`. Bare words must stand alone.
fn keyword_position(lower: &str, keyword: &str) -> Option<usize> {
    if keyword.starts_with('/') || keyword.contains(' ') || keyword.contains('.') {
        return lower.find(keyword);
    }
    lower.match_indices(keyword).map(|(i, _)| i).find(|&i| {
        let before = lower[..i].chars().next_back();
        let after = lower[i + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
