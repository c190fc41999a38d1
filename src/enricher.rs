//! Joins directory-discovered students with spreadsheet data.
//!
//! Matching is exact equality of normalized names; no fuzzy matching. On a
//! match the spreadsheet fields fill the directory person's empty fields.

use std::collections::HashMap;

use crate::classifier::UNKNOWN_PROGRAM;
use crate::documents::{IndexedDocument, PersonFolder};
use crate::models::{DataSource, Lead, Person, StudentStatus};
use crate::records::StudentEntry;

/// A student ready for staging, with the documents found for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentCandidate {
    pub person: Person,
    pub program: String,
    pub status: StudentStatus,
    pub source_path: Option<String>,
    pub documents: Vec<IndexedDocument>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub directory_students: usize,
    /// Directory students that matched spreadsheet data.
    pub enriched: usize,
    /// Spreadsheet students with no matching folder.
    pub spreadsheet_only: usize,
}

enum Match<'a> {
    Student(usize),
    Lead(&'a Lead),
}

/// Merges folders with spreadsheet students and leads.
///
/// Students take precedence over leads for the same name, and the first
/// spreadsheet record seen for a name wins. Every folder yields a student;
/// spreadsheet students without a folder are kept as well.
pub fn enrich(
    folders: Vec<PersonFolder>,
    students: &[StudentEntry],
    leads: &[Lead],
) -> (Vec<StudentCandidate>, EnrichmentStats) {
    let mut by_name: HashMap<&str, Match<'_>> = HashMap::new();
    for (idx, entry) in students.iter().enumerate() {
        by_name
            .entry(entry.person.normalized_name.as_str())
            .or_insert(Match::Student(idx));
    }
    for lead in leads {
        by_name
            .entry(lead.normalized_name.as_str())
            .or_insert(Match::Lead(lead));
    }

    let mut stats = EnrichmentStats::default();
    let mut consumed = vec![false; students.len()];
    let mut candidates = Vec::with_capacity(folders.len() + students.len());

    for folder in folders {
        stats.directory_students += 1;
        let source_path = folder.path.display().to_string();

        let mut person = Person::new(&folder.folder_name, DataSource::Directory);
        person.source_file = Some(source_path.clone());
        let mut program = folder.program.clone();
        let mut status = StudentStatus::PendingReview;

        let matched = match by_name.get(folder.normalized_name.as_str()) {
            Some(Match::Student(idx)) => {
                let entry = &students[*idx];
                consumed[*idx] = true;
                person.merge_missing(&entry.person);
                if program == UNKNOWN_PROGRAM {
                    if let Some(p) = &entry.program {
                        program = p.clone();
                    }
                }
                status = entry.status;
                true
            }
            Some(Match::Lead(lead)) => {
                person.merge_missing(&lead.to_person());
                if program == UNKNOWN_PROGRAM {
                    if let Some(p) = &lead.program_type {
                        program = p.clone();
                    }
                }
                true
            }
            None => false,
        };

        if matched {
            person.enrichment_flag = true;
            person.data_source = DataSource::DirectoryAndSpreadsheet;
            stats.enriched += 1;
            tracing::debug!("Enriched directory student {}", person.normalized_name);
        }

        candidates.push(StudentCandidate {
            person,
            program,
            status,
            source_path: Some(source_path),
            documents: folder.documents,
        });
    }

    for (entry, used) in students.iter().zip(consumed) {
        if used {
            continue;
        }
        stats.spreadsheet_only += 1;
        candidates.push(StudentCandidate {
            person: entry.person.clone(),
            program: entry
                .program
                .clone()
                .unwrap_or_else(|| UNKNOWN_PROGRAM.to_string()),
            status: entry.status,
            source_path: None,
            documents: Vec::new(),
        });
    }

    tracing::info!(
        "Enrichment: {} directory students ({} enriched), {} spreadsheet-only students",
        stats.directory_students,
        stats.enriched,
        stats.spreadsheet_only
    );
    (candidates, stats)
}
