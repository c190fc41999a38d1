//! Heuristics for directory names that are clearly not people.
//!
//! Document archives mix person folders with program, year, agency and
//! administrative folders. Anything matched here is never treated as a student.

use regex::Regex;
use std::sync::LazyLock;

use crate::normalize::{collapse_whitespace, strip_accents};

const BLACKLIST: &[&str] = &[
    "LA LIFE ADVENTURES",
    "ALLIANCE ABROAD GROUP",
    "AAG ALLIANCE ABROAD GROUP",
    "IEE INTERNATIONAL EDUCATIONAL EXCHANGE",
    "INTERNATIONAL EDUCATIONAL EXCHANGE",
    "AU PAIR",
    "WORK AND TRAVEL",
    "WORK & TRAVEL",
    "CAMP COUNSELOR",
    "INTERN & TRAINEE",
    "INTERN AND TRAINEE",
    "H-2B",
    "H 2B",
    "W&T",
    "W & T",
    "LISTA DE ESPERA",
    "CURSO DE INGLES",
    "CURSO INGLES",
    "ESTUDIOS ICE",
    "VIDEOS DE PANTALLA",
    "OFICINA",
    "TODOS",
    "COTIZACIONES",
    "QUOTATIONS",
];

static BLACKLIST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\d+([.,]\d+)*$",
        r"^\d{1,2}\.?\s",
        r"^(WAT|PPM)\s*(ICE\s*)?\d{4}$",
        r"^DOCS?\s+",
        r"CORREO.*BIENVENIDA",
        r"^FORMATOS?\b",
        r"VIDEOS?.*PANTALLA",
        r"^PREGUNTAS\s+WORK\s+AND\s+TRAVEL",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("sanitizer pattern is valid"))
    .collect()
});

/// True when a folder name is an administrative folder rather than a person.
pub fn is_false_positive(folder_name: &str) -> bool {
    let normalized = collapse_whitespace(&strip_accents(folder_name).to_uppercase());

    if BLACKLIST.contains(&normalized.as_str()) {
        return true;
    }
    if BLACKLIST_PATTERNS.iter().any(|re| re.is_match(&normalized)) {
        return true;
    }
    if normalized.chars().filter(|c| !c.is_whitespace()).count() <= 2 {
        return true;
    }
    if normalized.starts_with("WAT") && normalized.len() <= 12 {
        return true;
    }

    // Single short words are acronyms, countries or program names.
    let words = normalized.split(' ').count();
    words == 1 && normalized.chars().count() <= 10
}
