//! Competency (year-month) parsing and month arithmetic.
//!
//! CNIS statements and work booklets express periods as free-text Brazilian
//! dates: `01/2015`, `15/03/2015`, `2015-03`, `mar/2015`. Everything downstream
//! works on a canonical [`Competencia`] (`YYYY-MM`). Upstream extraction is
//! unreliable, so parsing returns `None` instead of failing and month counts
//! fall back to a zero sentinel.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Earliest year accepted. Anything older is an OCR artifact, not a CNIS period.
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Portuguese month names and abbreviations, matched on the first three letters.
const MONTH_PREFIXES: &[(&str, u32)] = &[
    ("jan", 1),
    ("fev", 2),
    ("mar", 3),
    ("abr", 4),
    ("mai", 5),
    ("jun", 6),
    ("jul", 7),
    ("ago", 8),
    ("set", 9),
    ("out", 10),
    ("nov", 11),
    ("dez", 12),
];

/// A calendar year-month, displayed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Competencia {
    year: i32,
    month: u32,
}

impl Competencia {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Competency containing the given date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The following month.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }
}

impl fmt::Display for Competencia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Competencia {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_competencia(s).ok_or_else(|| format!("Competência inválida: {s}"))
    }
}

impl Serialize for Competencia {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Competencia {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a free-text date into a competency.
///
/// Accepted shapes (day component, when present, is validated then dropped):
/// - `DD/MM/YYYY`, `D/M/YYYY`, `DD-MM-YYYY`, `DD.MM.YYYY`
/// - `MM/YYYY`, `M/YYYY`, `MM-YYYY`
/// - `YYYY-MM`, `YYYY-MM-DD`, `YYYY/MM`
/// - `jan/2015`, `março/2015`, `JAN-2015`
pub fn parse_competencia(text: &str) -> Option<Competencia> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parts: Vec<&str> = trimmed
        .split(|c: char| c == '/' || c == '-' || c == '.')
        .map(str::trim)
        .collect();

    match parts.as_slice() {
        [first, second] => {
            if let Some(month) = month_from_name(first) {
                return Competencia::new(parse_year(second)?, month);
            }
            if first.len() == 4 {
                // YYYY-MM
                return Competencia::new(parse_year(first)?, parse_number(second)?);
            }
            Competencia::new(parse_year(second)?, parse_number(first)?)
        }
        [first, second, third] => {
            if first.len() == 4 {
                // YYYY-MM-DD
                let year = parse_year(first)?;
                let month = parse_number(second)?;
                let day = parse_number(third)?;
                NaiveDate::from_ymd_opt(year, month, day)?;
                return Competencia::new(year, month);
            }
            let day = parse_number(first)?;
            let month = parse_number(second)?;
            let year = parse_year(third)?;
            NaiveDate::from_ymd_opt(year, month, day)?;
            Competencia::new(year, month)
        }
        _ => None,
    }
}

/// Canonical `YYYY-MM` token for a free-text date, or `None` when unusable.
pub fn normalize_token(text: &str) -> Option<String> {
    parse_competencia(text).map(|c| c.to_string())
}

fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_year(s: &str) -> Option<i32> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn month_from_name(s: &str) -> Option<u32> {
    let lower = s.to_lowercase();
    if lower.chars().count() < 3 || !lower.chars().all(char::is_alphabetic) {
        return None;
    }
    let prefix: String = lower.chars().take(3).collect();
    MONTH_PREFIXES
        .iter()
        .find(|(name, _)| *name == prefix)
        .map(|(_, month)| *month)
}

/// Inclusive month count between two competencies. `end` before `start` is 0.
pub fn months_between_inclusive(start: Competencia, end: Competencia) -> u32 {
    let diff = end.ordinal() - start.ordinal();
    if diff < 0 {
        0
    } else {
        (diff + 1) as u32
    }
}

/// Resolve a vínculo period into concrete bounds.
///
/// `None` when the start is unusable, or when an end is present but
/// unparseable. An absent end means the vínculo is ongoing and runs to the
/// month of `today`.
pub fn resolve_period(
    start: Option<&str>,
    end: Option<&str>,
    today: NaiveDate,
) -> Option<(Competencia, Competencia)> {
    let start = parse_competencia(start?)?;
    let end = match end.map(str::trim).filter(|e| !e.is_empty()) {
        Some(text) => parse_competencia(text)?,
        None => Competencia::from_date(today),
    };
    Some((start, end))
}

/// Expected month count for a vínculo period; 0 for missing or malformed dates.
pub fn expected_months(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> u32 {
    resolve_period(start, end, today)
        .map(|(s, e)| months_between_inclusive(s, e))
        .unwrap_or(0)
}

/// Every competency from `start` to `end`, inclusive, in order.
pub fn enumerate(start: Competencia, end: Competencia) -> Vec<Competencia> {
    let mut out = Vec::with_capacity(months_between_inclusive(start, end) as usize);
    let mut cursor = start;
    while cursor <= end {
        out.push(cursor);
        cursor = cursor.succ();
    }
    out
}
