//! Keyword heuristics over file and sheet names.

use crate::models::{Classification, LeadStatus, ReferenceType, StudentStatus};
use crate::normalize::fold;

/// Program label used when nothing in the path names one.
pub const UNKNOWN_PROGRAM: &str = "Unknown";

const STUDENT_KEYWORDS: &[&str] = &[
    "student",
    "estudiante",
    "participant",
    "enrolled",
    "inscrit",
    "matricul",
];

const LEAD_KEYWORDS: &[&str] = &[
    "lead",
    "prospect",
    "inquiry",
    "inquiries",
    "consulta",
    "interesad",
    "interested",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Labels a table from its file and sheet names.
///
/// Both keyword sets matching, or neither, yields `Reference`.
pub fn classify(file_name: &str, sheet_name: &str) -> Classification {
    let text = fold(&format!("{} {}", file_name, sheet_name));
    let student = contains_any(&text, STUDENT_KEYWORDS);
    let lead = contains_any(&text, LEAD_KEYWORDS);
    match (student, lead) {
        (true, false) => Classification::Student,
        (false, true) => Classification::Lead,
        _ => Classification::Reference,
    }
}

pub fn reference_type(file_name: &str, sheet_name: &str) -> ReferenceType {
    let text = fold(&format!("{} {}", file_name, sheet_name));
    if contains_any(&text, &["price", "precio", "tarifa"]) {
        ReferenceType::PriceList
    } else if contains_any(&text, &["employer", "empleador", "sponsor", "empresa"]) {
        ReferenceType::EmployerList
    } else if contains_any(&text, &["country", "pais", "countries"]) {
        ReferenceType::CountryList
    } else {
        ReferenceType::General
    }
}

pub fn lead_status(sheet_name: &str) -> LeadStatus {
    let text = fold(sheet_name);
    if contains_any(&text, &["convert", "convertid", "inscrit", "enrolled"]) {
        LeadStatus::Converted
    } else if contains_any(&text, &["perdid", "lost", "cancelad", "cancelled", "descartad"]) {
        LeadStatus::Lost
    } else if contains_any(&text, &["calificad", "qualified", "agendad", "scheduled"]) {
        LeadStatus::Qualified
    } else if contains_any(&text, &["contactad", "contacted", "seguimiento", "follow"]) {
        LeadStatus::Contacted
    } else {
        LeadStatus::New
    }
}

/// Status of a spreadsheet student row, from its sheet name.
pub fn student_status(sheet_name: &str) -> StudentStatus {
    let text = fold(sheet_name);
    if contains_any(&text, &["cancelad", "cancelled", "canceled", "retirad"]) {
        StudentStatus::Cancelled
    } else if contains_any(&text, &["agendad", "scheduled"]) {
        StudentStatus::Scheduled
    } else {
        StudentStatus::Enrolled
    }
}

/// Infers the exchange program from any path or label text.
pub fn infer_program(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    let tokens: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has_token = |t: &str| tokens.contains(&t);

    if folded.contains("au pair") || folded.contains("aupair") {
        Some("Au Pair")
    } else if has_token("wat") || folded.contains("work and travel") || folded.contains("work & travel") {
        Some("Work and Travel")
    } else if has_token("h2b") || folded.contains("h-2b") {
        Some("H-2B")
    } else if tokens
        .iter()
        .any(|t| matches!(*t, "intern" | "interns" | "internship") || t.starts_with("trainee"))
    {
        Some("Intern & Trainee")
    } else if tokens
        .iter()
        .any(|t| matches!(*t, "camp" | "camps") || t.starts_with("counselor"))
    {
        Some("Camp Counselor")
    } else if has_token("canada") {
        Some("Canada")
    } else {
        None
    }
}
