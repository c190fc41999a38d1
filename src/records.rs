//! Turns classified tables into typed records.
//!
//! This is the single normalization boundary: rows come in as cells and leave
//! as [`Person`], [`Lead`] or [`ReferenceRecord`] values. Student and lead
//! rows are deduplicated here with their own [`IdentityIndex`].

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::classifier::{self, infer_program};
use crate::columns::{resolve_headers, CanonicalField, ResolvedHeaders};
use crate::dates::{from_serial, parse_cell_date};
use crate::extractor::SheetTable;
use crate::identity::{IdentityIndex, PersonPlan};
use crate::models::{CellValue, Classification, DataSource, Lead, Person, ReferenceRecord, StudentStatus};
use crate::normalize::{
    is_usable_name, normalize_email, normalize_name, normalize_national_id, normalize_phone,
    UNKNOWN_NAME,
};

/// A deduplicated spreadsheet student, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentEntry {
    pub person: Person,
    pub program: Option<String>,
    pub status: StudentStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RowStats {
    pub rows_seen: usize,
    /// Rows with neither a usable name nor any identifying field.
    pub rows_skipped: usize,
    /// Rows folded into an earlier row of the same identity.
    pub duplicates_merged: usize,
}

/// Builds a person from one row, or `None` when the row is unusable.
///
/// Names shorter than two letters are replaced by a placeholder when the row
/// still has an email, phone or national id.
pub fn person_from_row(table: &SheetTable, headers: &ResolvedHeaders, row: &[CellValue]) -> Option<Person> {
    let email = headers.text(CanonicalField::Email, row).and_then(|v| normalize_email(&v));
    let phone = headers.text(CanonicalField::Phone, row).and_then(|v| normalize_phone(&v));
    let national_id = headers
        .text(CanonicalField::NationalId, row)
        .and_then(|v| normalize_national_id(&v));

    let raw_name = headers.text(CanonicalField::FullName, row).unwrap_or_default();
    let mut person = if is_usable_name(&normalize_name(&raw_name)) {
        Person::new(&raw_name, DataSource::Spreadsheet)
    } else if email.is_some() || phone.is_some() || national_id.is_some() {
        Person::new(UNKNOWN_NAME, DataSource::Spreadsheet)
    } else {
        return None;
    };

    person.email = email;
    person.phone = phone;
    person.national_id = national_id;
    person.address = headers.text(CanonicalField::Address, row);
    person.country = headers.text(CanonicalField::Country, row);
    person.city = headers.text(CanonicalField::City, row);
    person.birth_date = headers
        .cell(CanonicalField::BirthDate, row)
        .and_then(parse_cell_date);
    person.source_file = Some(table.source_file.clone());
    person.source_sheet = Some(table.sheet_name.clone());
    Some(person)
}

/// Program from the row's program column, else from the file and sheet names.
fn row_program(table: &SheetTable, headers: &ResolvedHeaders, row: &[CellValue]) -> Option<String> {
    headers.text(CanonicalField::Program, row).or_else(|| {
        infer_program(&format!("{} {}", table.source_file, table.sheet_name)).map(str::to_string)
    })
}

/// Deduplicated students from every STUDENT table, in first-seen order.
pub fn collect_students(tables: &[SheetTable]) -> (Vec<StudentEntry>, RowStats) {
    let mut index = IdentityIndex::new();
    let mut entries: Vec<StudentEntry> = Vec::new();
    let mut slots: HashMap<Uuid, usize> = HashMap::new();
    let mut stats = RowStats::default();

    for table in tables.iter().filter(|t| t.classification == Classification::Student) {
        let headers = resolve_headers(&table.headers);
        let status = classifier::student_status(&table.sheet_name);

        for row in &table.rows {
            stats.rows_seen += 1;
            let Some(person) = person_from_row(table, &headers, row) else {
                stats.rows_skipped += 1;
                continue;
            };
            let program = row_program(table, &headers, row);

            match index.upsert(&person) {
                PersonPlan::Create(person) => {
                    slots.insert(person.id, entries.len());
                    entries.push(StudentEntry { person, program, status });
                }
                plan => {
                    stats.duplicates_merged += 1;
                    if let Some(entry) = slots.get(&plan.person_id()).map(|slot| &mut entries[*slot]) {
                        if entry.program.is_none() {
                            entry.program = program;
                        }
                    }
                }
            }
        }
    }

    for entry in &mut entries {
        if let Some(merged) = index.get(&entry.person.id) {
            entry.person = merged.clone();
        }
    }

    (entries, stats)
}

/// Deduplicated leads from every LEAD table, in first-seen order.
pub fn collect_leads(tables: &[SheetTable]) -> (Vec<Lead>, RowStats) {
    let mut index = IdentityIndex::new();
    let mut leads: Vec<Lead> = Vec::new();
    let mut slots: HashMap<Uuid, usize> = HashMap::new();
    let mut stats = RowStats::default();

    for table in tables.iter().filter(|t| t.classification == Classification::Lead) {
        let headers = resolve_headers(&table.headers);
        let status = classifier::lead_status(&table.sheet_name);

        for row in &table.rows {
            stats.rows_seen += 1;
            let Some(person) = person_from_row(table, &headers, row) else {
                stats.rows_skipped += 1;
                continue;
            };
            let program = row_program(table, &headers, row);
            let interest_level = headers.text(CanonicalField::InterestLevel, row);

            match index.upsert(&person) {
                PersonPlan::Create(person) => {
                    let mut lead = Lead::from_person(&person, status);
                    lead.id = person.id;
                    lead.program_type = program;
                    lead.interest_level = interest_level;
                    lead.notes = extra_columns_note(table, &headers, row);
                    slots.insert(person.id, leads.len());
                    leads.push(lead);
                }
                plan => {
                    stats.duplicates_merged += 1;
                    if let Some(lead) = slots.get(&plan.person_id()).map(|slot| &mut leads[*slot]) {
                        if lead.program_type.is_none() {
                            lead.program_type = program;
                        }
                        if lead.interest_level.is_none() {
                            lead.interest_level = interest_level;
                        }
                    }
                }
            }
        }
    }

    for lead in &mut leads {
        if let Some(merged) = index.get(&lead.id) {
            lead.email = merged.email.clone();
            lead.phone = merged.phone.clone();
            lead.address = merged.address.clone();
            lead.national_id = merged.national_id.clone();
            lead.birth_date = merged.birth_date;
            lead.country = merged.country.clone();
            lead.city = merged.city.clone();
        }
    }

    (leads, stats)
}

/// Non-canonical columns of a row as `Header: value` pairs.
fn extra_columns_note(table: &SheetTable, headers: &ResolvedHeaders, row: &[CellValue]) -> Option<String> {
    let mapped: Vec<usize> = CanonicalField::ALL
        .iter()
        .filter_map(|f| headers.column(*f).map(|c| c.index))
        .collect();

    let parts: Vec<String> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(idx, header)| !mapped.contains(idx) && !header.is_empty())
        .filter_map(|(idx, header)| {
            row.get(idx)
                .and_then(CellValue::as_text)
                .map(|value| format!("{}: {}", header, value))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

/// JSON keys for a table's columns. Blank headers become `column_<n>` and
/// repeated headers get a `_2`, `_3`... suffix so no value is overwritten.
fn payload_columns(headers: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, h)| {
            let base = if h.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                h.clone()
            };
            let mut key = base.clone();
            let mut n = 2;
            while !used.insert(key.clone()) {
                key = format!("{}_{}", base, n);
                n += 1;
            }
            key
        })
        .collect()
}

/// One reference record per REFERENCE table, holding every row as JSON.
pub fn reference_record(table: &SheetTable) -> ReferenceRecord {
    let columns = payload_columns(&table.headers);

    let rows: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = row.get(idx).map(cell_to_json).unwrap_or(Value::Null);
                object.insert(column.clone(), value);
            }
            Value::Object(object)
        })
        .collect();

    let category = infer_program(&format!("{} {}", table.source_file, table.sheet_name))
        .unwrap_or("General")
        .to_string();

    ReferenceRecord {
        id: Uuid::new_v4(),
        source_file: table.source_file.clone(),
        source_sheet: table.sheet_name.clone(),
        data_type: classifier::reference_type(table.file_name(), &table.sheet_name),
        category,
        payload: json!({
            "columns": columns,
            "rows": rows,
            "row_count": table.rows.len(),
        }),
        created_at: Utc::now(),
    }
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Empty => Value::Null,
        CellValue::Text(s) => Value::String(s.trim().to_string()),
        CellValue::Number(n) => json!(n),
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::Serial(n) => from_serial(*n)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or_else(|| json!(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn table(classification: Classification, sheet: &str, headers: &[&str], rows: Vec<Vec<CellValue>>) -> SheetTable {
        SheetTable {
            source_file: "/data/WAT 2024/base.xlsx".to_string(),
            sheet_name: sheet.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
            classification,
        }
    }

    fn text(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    #[test]
    fn rows_normalize_into_persons() {
        let t = table(
            Classification::Student,
            "Inscritos",
            &["Nombre Completo", "Correo Electrónico", "Cédula", "Fecha de Nacimiento"],
            vec![text(&["  josé   pérez ", "Jose@Mail.com", "1.023.456", "25/ sep/1999"])],
        );
        let headers = resolve_headers(&t.headers);
        let person = person_from_row(&t, &headers, &t.rows[0]).unwrap();
        assert_eq!(person.normalized_name, "JOSE PEREZ");
        assert_eq!(person.email.as_deref(), Some("jose@mail.com"));
        assert_eq!(person.national_id.as_deref(), Some("1023456"));
        assert_eq!(person.birth_date, NaiveDate::from_ymd_opt(1999, 9, 25));
        assert_eq!(person.source_sheet.as_deref(), Some("Inscritos"));
    }

    #[test]
    fn unusable_names_need_an_identifier() {
        let t = table(
            Classification::Lead,
            "Leads",
            &["Nombre", "Email", "Ciudad"],
            vec![text(&["A", "x@example.com", ""]), text(&["-", "", "Cali"])],
        );
        let headers = resolve_headers(&t.headers);
        let first = person_from_row(&t, &headers, &t.rows[0]).unwrap();
        assert_eq!(first.normalized_name, UNKNOWN_NAME);
        assert!(person_from_row(&t, &headers, &t.rows[1]).is_none());
    }

    #[test]
    fn student_rows_are_deduplicated_across_sheets() {
        let a = table(
            Classification::Student,
            "Inscritos",
            &["Nombre", "Cedula", "Celular"],
            vec![
                text(&["Ana Gómez", "100200300", ""]),
                text(&["Luis Pérez", "", "3001234567"]),
            ],
        );
        let b = table(
            Classification::Student,
            "Agendados",
            &["Nombre", "Cedula", "Email"],
            vec![text(&["ANA GOMEZ", "100200300", "ana@example.com"])],
        );

        let (entries, stats) = collect_students(&[a, b]);
        assert_eq!(entries.len(), 2);
        assert_eq!(stats.rows_seen, 3);
        assert_eq!(stats.duplicates_merged, 1);
        assert_eq!(entries[0].person.email.as_deref(), Some("ana@example.com"));
        assert!(entries[0].person.enrichment_flag);
        assert_eq!(entries[0].status, StudentStatus::Enrolled);
        assert_eq!(entries[0].program.as_deref(), Some("Work and Travel"));
    }

    #[test]
    fn leads_carry_status_and_extra_columns() {
        let t = table(
            Classification::Lead,
            "Interesados Contactados",
            &["Nombre", "Email", "Observaciones", "Programa"],
            vec![text(&["Maria Lopez", "maria@example.com", "Llamar en mayo", "Au Pair"])],
        );
        let (leads, _) = collect_leads(&[t]);
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].status, crate::models::LeadStatus::Contacted);
        assert_eq!(leads[0].program_type.as_deref(), Some("Au Pair"));
        assert_eq!(leads[0].notes.as_deref(), Some("Observaciones: Llamar en mayo"));
    }

    #[test]
    fn reference_payload_keeps_every_row() {
        let t = table(
            Classification::Reference,
            "Precios",
            &["Programa", "", "Precio"],
            vec![
                vec![CellValue::from("WAT"), CellValue::Empty, CellValue::Number(3500.0)],
                vec![CellValue::from("Au Pair"), CellValue::Empty, CellValue::Number(4200.0)],
            ],
        );
        let record = reference_record(&t);
        assert_eq!(record.data_type, crate::models::ReferenceType::PriceList);
        assert_eq!(record.category, "Work and Travel");
        assert_eq!(record.payload["row_count"], 2);
        assert_eq!(record.payload["columns"][1], "column_2");
        assert_eq!(record.payload["rows"][1]["Programa"], "Au Pair");
    }

    #[test]
    fn repeated_headers_keep_all_values() {
        let t = table(
            Classification::Reference,
            "Empleadores",
            &["Nombre", "Nombre", "", "Nombre"],
            vec![text(&["Hotel Sol", "Ana", "x", "Luis"])],
        );
        let record = reference_record(&t);
        assert_eq!(
            record.payload["columns"],
            serde_json::json!(["Nombre", "Nombre_2", "column_3", "Nombre_3"])
        );
        let row = &record.payload["rows"][0];
        assert_eq!(row["Nombre"], "Hotel Sol");
        assert_eq!(row["Nombre_2"], "Ana");
        assert_eq!(row["Nombre_3"], "Luis");
    }
}
