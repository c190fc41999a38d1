//! Multi-format date parsing for spreadsheet cells.
//!
//! Accepted inputs, in priority order: native date cells, numeric spreadsheet
//! serials (epoch 1899-12-30), and free text. Unparseable values yield `None`.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::CellValue;
use crate::normalize::fold;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Serials above this are not plausible dates.
const MAX_SERIAL: f64 = 100_000.0;

static AGE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(anos?|years?|yrs?|edad|age)\b").expect("age regex is valid")
});

static ISO_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4})[-/.]([0-9]{1,2})[-/.]([0-9]{1,2})(?:$|[ T])").expect("iso regex is valid")
});

static COMPACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}$").expect("compact regex is valid"));

static SERIAL_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5,}(?:\.[0-9]+)?$").expect("serial regex is valid"));

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s/\-.,]+").expect("separator regex is valid"));

/// English and Spanish month prefixes.
const MONTHS: &[(&str, u32)] = &[
    ("jan", 1),
    ("ene", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("abr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("ago", 8),
    ("sep", 9),
    ("set", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
    ("dic", 12),
];

/// Connector words ignored between date parts ("25 de agosto de 1999").
const FILLER_WORDS: &[&str] = &["de", "del", "of", "the"];

/// Parses any cell into a date.
pub fn parse_cell_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Serial(serial) | CellValue::Number(serial) => from_serial(*serial),
        CellValue::Text(text) => parse_date_text(text),
        CellValue::Empty | CellValue::Bool(_) => None,
    }
}

/// Converts a spreadsheet serial (days since 1899-12-30) to a date.
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial >= MAX_SERIAL {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = epoch.checked_add_signed(Duration::days(serial.floor() as i64))?;
    in_range(date)
}

/// Parses free text, rejecting age expressions and other non-dates.
pub fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let folded = fold(raw);
    if folded.is_empty() || AGE_TEXT.is_match(&folded) {
        return None;
    }

    let cleaned = folded.replace("/ ", "/").replace(" /", "/");
    let cleaned = cleaned.trim();

    if let Some(caps) = ISO_PREFIX.captures(cleaned) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return build(year, month, day);
    }

    if COMPACT.is_match(cleaned) {
        let year = cleaned[0..4].parse().ok()?;
        let month = cleaned[4..6].parse().ok()?;
        let day = cleaned[6..8].parse().ok()?;
        return build(year, month, day).or_else(|| {
            // ddmmyyyy
            let day = cleaned[0..2].parse().ok()?;
            let month = cleaned[2..4].parse().ok()?;
            let year = cleaned[4..8].parse().ok()?;
            build(year, month, day)
        });
    }

    if SERIAL_TEXT.is_match(cleaned) {
        return from_serial(cleaned.parse().ok()?);
    }

    parse_tokens(cleaned)
}

enum Part {
    Number(u32, usize),
    Month(u32),
}

fn parse_tokens(cleaned: &str) -> Option<NaiveDate> {
    let parts: Vec<Part> = SEPARATORS
        .split(cleaned)
        .filter(|t| !t.is_empty() && !FILLER_WORDS.contains(t))
        .map(parse_part)
        .collect::<Option<Vec<_>>>()?;

    if parts.len() != 3 {
        return None;
    }

    let month_at = parts.iter().position(|p| matches!(p, Part::Month(_)));
    match month_at {
        Some(idx) => {
            let month = match parts[idx] {
                Part::Month(m) => m,
                Part::Number(..) => return None,
            };
            let numbers: Vec<(u32, usize)> = parts
                .iter()
                .filter_map(|p| match p {
                    Part::Number(n, width) => Some((*n, *width)),
                    Part::Month(_) => None,
                })
                .collect();
            let [(first, first_w), (second, second_w)] = numbers.as_slice() else {
                return None;
            };
            // The four-digit (or larger) number is the year; otherwise the last one.
            let (day, year, year_w) = if *first_w == 4 || *first > 31 {
                (*second, *first, *first_w)
            } else {
                (*first, *second, *second_w)
            };
            build(expand_year(year, year_w), month, day)
        }
        None => {
            let nums: Vec<(u32, usize)> = parts
                .iter()
                .filter_map(|p| match p {
                    Part::Number(n, width) => Some((*n, *width)),
                    Part::Month(_) => None,
                })
                .collect();
            let (a, b, (c, c_w)) = (nums[0], nums[1], nums[2]);
            if a.1 == 4 {
                return build(a.0 as i32, b.0, c);
            }
            // Day-first unless the middle value cannot be a month.
            let (day, month) = if b.0 > 12 && a.0 <= 12 {
                (b.0, a.0)
            } else {
                (a.0, b.0)
            };
            build(expand_year(c, c_w), month, day)
        }
    }
}

fn parse_part(token: &str) -> Option<Part> {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return Some(Part::Number(token.parse().ok()?, token.len()));
    }
    if token.len() >= 3 && token.chars().all(|c| c.is_ascii_alphabetic()) {
        let prefix = &token[..3];
        return MONTHS
            .iter()
            .find(|(name, _)| *name == prefix)
            .map(|(_, month)| Part::Month(*month));
    }
    None
}

/// Two-digit years: below 50 is 20xx, otherwise 19xx.
fn expand_year(year: u32, width: usize) -> i32 {
    let year = year as i32;
    if width <= 2 {
        if year < 50 {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    }
}

fn build(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).and_then(in_range)
}

fn in_range(date: NaiveDate) -> Option<NaiveDate> {
    (MIN_YEAR..=MAX_YEAR).contains(&date.year()).then_some(date)
}
