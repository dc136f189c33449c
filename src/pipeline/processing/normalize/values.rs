use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};

/// Coarse type of a sampled cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Empty,
    Integer,
    Decimal,
    Date,
    Text,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Empty => "Empty",
            ValueKind::Integer => "Integer",
            ValueKind::Decimal => "Decimal",
            ValueKind::Date => "Date",
            ValueKind::Text => "Text",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one raw cell.
///
/// Eight-digit values that form a valid `MMDDYYYY` or `YYYYMMDD` date are reported as
/// dates; any other run of digits is an integer.
pub fn infer_kind(raw: &str) -> ValueKind {
    let value = raw.trim();
    if value.is_empty() {
        return ValueKind::Empty;
    }
    let digits = value.strip_prefix('-').unwrap_or(value);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if value.len() == 8 && parse_date(value).is_some() {
            return ValueKind::Date;
        }
        return ValueKind::Integer;
    }
    if parse_date(value).is_some() {
        return ValueKind::Date;
    }
    if parse_money(value).is_some() {
        return ValueKind::Decimal;
    }
    ValueKind::Text
}

/// Round a monetary amount to cents, half away from zero
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse a monetary string: `$` and thousands separators are dropped, `(x)` is negative,
/// a leading sign is honoured. Returns `None` for empty or unparseable input.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let mut negative = false;
    if value.starts_with('(') && value.ends_with(')') && value.len() > 2 {
        negative = true;
        value = value[1..value.len() - 1].trim();
    }
    if let Some(rest) = value.strip_prefix('-') {
        negative = !negative;
        value = rest.trim_start();
    } else if let Some(rest) = value.strip_prefix('+') {
        value = rest.trim_start();
    }
    let value = value.strip_prefix('$').unwrap_or(value);

    let cleaned: String = value.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty()
        || !cleaned.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        || !cleaned.bytes().any(|b| b.is_ascii_digit())
    {
        return None;
    }

    let amount = Decimal::from_str(&cleaned).ok()?;
    let amount = if negative { -amount } else { amount };
    Some(round_cents(amount))
}

fn plausible(date: NaiveDate) -> Option<NaiveDate> {
    use chrono::Datelike;
    (1900..=2100).contains(&date.year()).then_some(date)
}

fn eight_digit_date(value: &str) -> Option<NaiveDate> {
    let num = |range: std::ops::Range<usize>| value[range].parse::<u32>().ok();
    // FEC bulk files use MMDDYYYY, so it wins over YYYYMMDD
    let mmddyyyy = num(0..2)
        .zip(num(2..4))
        .zip(num(4..8))
        .and_then(|((m, d), y)| NaiveDate::from_ymd_opt(y as i32, m, d))
        .and_then(plausible);
    mmddyyyy.or_else(|| {
        num(0..4)
            .zip(num(4..6))
            .zip(num(6..8))
            .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y as i32, m, d))
            .and_then(plausible)
    })
}

/// Parse the date formats seen in FEC and derived files
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        return eight_digit_date(value);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return plausible(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%m/%d/%Y") {
        return plausible(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return plausible(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return plausible(dt.date());
    }
    None
}

/// Four-digit year, tolerating surrounding whitespace
pub fn parse_year(raw: &str) -> Option<i32> {
    let value = raw.trim();
    if value.len() != 4 {
        return None;
    }
    value.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y))
}
