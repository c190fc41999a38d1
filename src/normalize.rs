//! Field normalization applied once, at the ingestion boundary.
//!
//! Everything downstream (identity keys, header matching, classification)
//! works on the values produced here.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum length of a usable normalized name.
pub const MIN_NAME_LEN: usize = 2;

/// Placeholder name for rows that carry contact data but no readable name.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// Placeholder values spreadsheets use for "no data".
const NULL_MARKERS: &[&str] = &["nan", "none", "null", "n/a", "na", "-", "--", "#n/a", "sin dato"];

// RFC 5322 simplified email regex
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Removes diacritics: decompose, then drop combining marks.
pub fn strip_accents(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

/// Folded form used for keyword and header comparison: trimmed, lowercase, unaccented.
pub fn fold(value: &str) -> String {
    collapse_whitespace(&strip_accents(value).to_lowercase())
}

/// Trims a raw text value, mapping empty strings and null markers to `None`.
pub fn clean_text(value: &str) -> Option<String> {
    let trimmed = collapse_whitespace(value);
    if trimmed.is_empty() || NULL_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
        None
    } else {
        Some(trimmed)
    }
}

/// Canonical name used for identity matching.
///
/// Uppercase, unaccented, punctuation and hyphens turned into spaces, digits
/// dropped, whitespace collapsed. `"  josé-maría  o'neil "` becomes
/// `"JOSE MARIA O NEIL"`.
pub fn normalize_name(value: &str) -> String {
    let mapped: String = strip_accents(value)
        .chars()
        .map(|c| {
            if c.is_alphabetic() {
                c
            } else if c.is_whitespace() || c.is_ascii_punctuation() {
                ' '
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    collapse_whitespace(&mapped).to_uppercase()
}

/// Whether a normalized name is long enough to identify anyone.
pub fn is_usable_name(normalized: &str) -> bool {
    normalized.chars().filter(|c| c.is_alphabetic()).count() >= MIN_NAME_LEN
}

/// Validate email address
///
/// Checks for:
/// - Basic email format (contains @ and .)
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - RFC 5322-style structure
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::debug!("Rejected email with placeholder pattern '{}': {}", pattern, email);
            return false;
        }
    }

    EMAIL_REGEX.is_match(email)
}

/// Lowercases and validates an email. Invalid addresses are dropped.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = clean_text(raw)?.to_lowercase().replace(' ', "");
    if is_valid_email(&email) {
        Some(email)
    } else {
        tracing::debug!("Dropping invalid email: {}", raw);
        None
    }
}

/// Normalize a phone number.
///
/// Uses the phonenumber library with the Colombian region (CO) as default:
/// valid numbers come back in E.164 (`+573001234567`). Numbers the library
/// rejects are kept as plain digits when at least 7 digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let raw = clean_text(raw)?;
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::CO), &raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        _ => {
            if raw.trim_start().starts_with('+') {
                Some(format!("+{}", digits))
            } else {
                Some(digits)
            }
        }
    }
}

/// Digits-only form of a phone, used as an identity key component.
pub fn phone_key(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalizes a national id: no separators, uppercase, no float suffix.
pub fn normalize_national_id(raw: &str) -> Option<String> {
    let raw = clean_text(raw)?;
    let raw = raw.strip_suffix(".0").unwrap_or(&raw);
    let id: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if id.len() < 3 {
        None
    } else {
        Some(id)
    }
}
