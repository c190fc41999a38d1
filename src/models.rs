use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::classifier::UNKNOWN_PROGRAM;
use crate::normalize;

/// Raised when a stored label does not match any known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} label: {value}")]
pub struct UnknownLabel {
    kind: &'static str,
    value: String,
}

/// Declares a closed set of labels persisted as uppercase text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownLabel;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match value.as_str() {
                    $($label => Ok($name::$variant),)+
                    _ => Err(UnknownLabel {
                        kind: stringify!($name),
                        value,
                    }),
                }
            }
        }
    };
}

// ============ Labels ============

text_enum! {
    /// Business meaning of an extracted table.
    Classification {
        Student => "STUDENT",
        Lead => "LEAD",
        Reference => "REFERENCE",
    }
}

text_enum! {
    /// Where a person record was first observed.
    DataSource {
        Spreadsheet => "SPREADSHEET",
        Directory => "DIRECTORY",
        DirectoryAndSpreadsheet => "DIRECTORY+SPREADSHEET",
    }
}

text_enum! {
    StudentStatus {
        PendingReview => "PENDING_REVIEW",
        Enrolled => "ENROLLED",
        Scheduled => "SCHEDULED",
        Cancelled => "CANCELLED",
    }
}

text_enum! {
    LeadStatus {
        New => "NEW",
        Contacted => "CONTACTED",
        Qualified => "QUALIFIED",
        Converted => "CONVERTED",
        Lost => "LOST",
    }
}

text_enum! {
    /// Document category inferred from the file name.
    DocumentType {
        Passport => "PASSPORT",
        Visa => "VISA",
        Diploma => "DIPLOMA",
        Transcript => "TRANSCRIPT",
        Photo => "PHOTO",
        Financial => "FINANCIAL",
        Medical => "MEDICAL",
        IdCard => "ID_CARD",
        Letter => "LETTER",
        Resume => "RESUME",
        Contract => "CONTRACT",
        BackgroundCheck => "BACKGROUND_CHECK",
        EmergencyContact => "EMERGENCY_CONTACT",
        Quotation => "QUOTATION",
        Other => "OTHER",
    }
}

text_enum! {
    ReferenceType {
        PriceList => "PRICE_LIST",
        EmployerList => "EMPLOYER_LIST",
        CountryList => "COUNTRY_LIST",
        General => "GENERAL_REFERENCE",
    }
}

text_enum! {
    RunStatus {
        Running => "RUNNING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

text_enum! {
    /// Closed taxonomy for row-level persistence failures.
    FailureKind {
        DateParse => "DATE_PARSE_ERROR",
        Validation => "VALIDATION_ERROR",
        Duplicate => "DUPLICATE_ERROR",
        Other => "OTHER",
    }
}

impl FailureKind {
    /// Classifies a raw error message by the keywords it contains.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        // Constraint messages name columns such as updated_at, so they go before the date check.
        if lower.contains("duplicate") || lower.contains("unique") {
            FailureKind::Duplicate
        } else if lower.contains("null value")
            || lower.contains("not-null")
            || lower.contains("check constraint")
            || lower.contains("foreign key")
            || lower.contains("too long")
        {
            FailureKind::Validation
        } else if lower.contains("date") || lower.contains("time zone") {
            FailureKind::DateParse
        } else if lower.contains("validation") || lower.contains("invalid") {
            FailureKind::Validation
        } else {
            FailureKind::Other
        }
    }
}

// ============ Extraction Values ============

/// A single spreadsheet cell after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Date/time cell, stored as its spreadsheet serial.
    Serial(f64),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering of the cell. Integral numbers render without a fraction.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => normalize::clean_text(s),
            CellValue::Number(n) | CellValue::Serial(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(format!("{}", n))
                }
            }
            CellValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

// ============ Entities ============

/// Identity-bearing entity shared by students and leads.
///
/// The same shape is used for staging and production rows.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Person {
    /// Unique identifier, assigned when the record is first built.
    pub id: Uuid,
    /// Display name as found in the source.
    pub full_name: String,
    /// Uppercase, unaccented, whitespace-collapsed name.
    pub normalized_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// National identity number ("cedula").
    pub national_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    /// File (or directory) the record came from.
    pub source_file: Option<String>,
    pub source_sheet: Option<String>,
    /// Whether a secondary source contributed fields to this record.
    pub enrichment_flag: bool,
    #[sqlx(try_from = "String")]
    pub data_source: DataSource,
    pub created_at: DateTime<Utc>,
}

impl Person {
    /// Builds a fresh record with the name normalized once at the boundary.
    pub fn new(full_name: &str, data_source: DataSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.trim().to_string(),
            normalized_name: normalize::normalize_name(full_name),
            email: None,
            phone: None,
            address: None,
            national_id: None,
            birth_date: None,
            country: None,
            city: None,
            source_file: None,
            source_sheet: None,
            enrichment_flag: false,
            data_source,
            created_at: Utc::now(),
        }
    }

    /// Accumulative merge: fills only fields that are absent here.
    ///
    /// Populated fields are never overwritten (first write wins). Returns
    /// `true` when at least one field was filled.
    pub fn merge_missing(&mut self, other: &Person) -> bool {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) -> bool {
            if slot.is_none() && value.is_some() {
                *slot = value.clone();
                true
            } else {
                false
            }
        }

        let mut changed = false;
        changed |= fill(&mut self.email, &other.email);
        changed |= fill(&mut self.phone, &other.phone);
        changed |= fill(&mut self.address, &other.address);
        changed |= fill(&mut self.national_id, &other.national_id);
        changed |= fill(&mut self.birth_date, &other.birth_date);
        changed |= fill(&mut self.country, &other.country);
        changed |= fill(&mut self.city, &other.city);
        if changed {
            self.enrichment_flag = true;
        }
        changed
    }
}

/// A person known to be enrolled. Owns exactly one person.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub person_id: Uuid,
    pub program: String,
    #[sqlx(try_from = "String")]
    pub status: StudentStatus,
    /// Directory the student folder was discovered in, if any.
    pub source_path: Option<String>,
    pub enrichment_flag: bool,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(person_id: Uuid, program: &str, status: StudentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            program: program.to_string(),
            status,
            source_path: None,
            enrichment_flag: false,
            created_at: Utc::now(),
        }
    }

    /// Fills an unknown program and a missing source path. Status is never changed.
    pub fn merge_missing(&mut self, other: &Student) -> bool {
        let mut changed = false;
        if self.program == UNKNOWN_PROGRAM && other.program != UNKNOWN_PROGRAM {
            self.program = other.program.clone();
            changed = true;
        }
        if self.source_path.is_none() && other.source_path.is_some() {
            self.source_path = other.source_path.clone();
            changed = true;
        }
        if changed {
            self.enrichment_flag = true;
        }
        changed
    }
}

/// A prospect as held in staging: person fields are carried inline.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub full_name: String,
    pub normalized_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub national_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub program_type: Option<String>,
    pub interest_level: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub source_file: String,
    pub source_sheet: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Builds a staging lead from a resolved person.
    pub fn from_person(person: &Person, status: LeadStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: person.full_name.clone(),
            normalized_name: person.normalized_name.clone(),
            email: person.email.clone(),
            phone: person.phone.clone(),
            address: person.address.clone(),
            national_id: person.national_id.clone(),
            birth_date: person.birth_date,
            country: person.country.clone(),
            city: person.city.clone(),
            program_type: None,
            interest_level: None,
            status,
            notes: None,
            source_file: person.source_file.clone().unwrap_or_default(),
            source_sheet: person.source_sheet.clone().unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Person candidate used when promoting the lead. Shares the lead's id.
    pub fn to_person(&self) -> Person {
        Person {
            id: self.id,
            full_name: self.full_name.clone(),
            normalized_name: self.normalized_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            national_id: self.national_id.clone(),
            birth_date: self.birth_date,
            country: self.country.clone(),
            city: self.city.clone(),
            source_file: Some(self.source_file.clone()),
            source_sheet: Some(self.source_sheet.clone()),
            enrichment_flag: false,
            data_source: DataSource::Spreadsheet,
            created_at: self.created_at,
        }
    }
}

/// A prospect in production, linked to a resolved person.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProductionLead {
    pub id: Uuid,
    pub person_id: Uuid,
    /// Set once the person also owns a student.
    pub student_id: Option<Uuid>,
    pub program_type: Option<String>,
    pub interest_level: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: LeadStatus,
    pub source_file: String,
    pub source_sheet: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductionLead {
    /// Fills the student link and interest fields when absent.
    pub fn merge_missing(&mut self, other: &ProductionLead) -> bool {
        let mut changed = false;
        if self.student_id.is_none() && other.student_id.is_some() {
            self.student_id = other.student_id;
            changed = true;
        }
        if self.program_type.is_none() && other.program_type.is_some() {
            self.program_type = other.program_type.clone();
            changed = true;
        }
        if self.interest_level.is_none() && other.interest_level.is_some() {
            self.interest_level = other.interest_level.clone();
            changed = true;
        }
        if changed {
            self.updated_at = Some(Utc::now());
        }
        changed
    }
}

/// A file belonging to a student, unique per (student, checksum).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub student_id: Uuid,
    pub original_name: String,
    /// Normalized name, `<DOCTYPE>_<NN><ext>`.
    pub file_name: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    #[sqlx(try_from = "String")]
    pub document_type: DocumentType,
    /// Hex-encoded SHA-256 of the file content.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque reference table payload. Append-only.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: Uuid,
    pub source_file: String,
    pub source_sheet: String,
    #[sqlx(try_from = "String")]
    pub data_type: ReferenceType,
    pub category: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One invocation of the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub source_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    /// Aggregate counts per entity type.
    pub counts: serde_json::Value,
}

/// A failed attempt to persist a single record.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub error_message: String,
    #[sqlx(try_from = "String")]
    pub error_type: FailureKind,
    pub source_file: Option<String>,
    pub source_sheet: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub resolved: bool,
}

/// Maximum stored length of a failure message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

impl FailureRecord {
    pub fn new(
        run_id: Option<Uuid>,
        payload: serde_json::Value,
        error_message: &str,
        error_type: FailureKind,
        source_file: Option<String>,
        source_sheet: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            payload,
            error_message: error_message.chars().take(MAX_ERROR_MESSAGE_LEN).collect(),
            error_type,
            source_file,
            source_sheet,
            attempted_at: Utc::now(),
            resolved: false,
        }
    }
}
