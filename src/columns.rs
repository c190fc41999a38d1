//! Canonical field resolution for free-form, multilingual headers.

use std::collections::HashMap;

use crate::models::CellValue;
use crate::normalize::fold;

/// Rows scanned when looking for the header row.
const HEADER_SCAN_ROWS: usize = 10;

/// Fields the engine understands, independent of the header spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    FullName,
    Email,
    Phone,
    Address,
    NationalId,
    BirthDate,
    Program,
    Country,
    City,
    InterestLevel,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 10] = [
        CanonicalField::FullName,
        CanonicalField::Email,
        CanonicalField::Phone,
        CanonicalField::Address,
        CanonicalField::NationalId,
        CanonicalField::BirthDate,
        CanonicalField::Program,
        CanonicalField::Country,
        CanonicalField::City,
        CanonicalField::InterestLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::FullName => "full_name",
            CanonicalField::Email => "email",
            CanonicalField::Phone => "phone",
            CanonicalField::Address => "address",
            CanonicalField::NationalId => "national_id",
            CanonicalField::BirthDate => "birth_date",
            CanonicalField::Program => "program",
            CanonicalField::Country => "country",
            CanonicalField::City => "city",
            CanonicalField::InterestLevel => "interest_level",
        }
    }

    /// Recognized header spellings, already folded (lowercase, unaccented).
    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::FullName => &[
                "nombre completo",
                "nombres completos",
                "nombre y apellido",
                "nombres y apellidos",
                "apellidos y nombres",
                "full name",
                "fullname",
                "nombre",
                "nombres",
                "name",
                "participant name",
                "student name",
            ],
            CanonicalField::Email => &[
                "correo",
                "correo electronico",
                "email",
                "e-mail",
                "mail",
                "email address",
            ],
            CanonicalField::Phone => &[
                "celular",
                "cel",
                "telefono",
                "telefono celular",
                "phone",
                "phone number",
                "mobile",
                "movil",
                "tel",
                "whatsapp",
            ],
            CanonicalField::Address => &["direccion", "address", "direccion de residencia"],
            CanonicalField::NationalId => &[
                "cedula",
                "id",
                "cc",
                "document id",
                "documento",
                "numero de documento",
                "no. documento",
                "identificacion",
                "numero de identificacion",
            ],
            CanonicalField::BirthDate => &[
                "fecha de nacimiento",
                "fecha nacimiento",
                "fecha nac",
                "birth date",
                "birthdate",
                "date of birth",
                "birthday",
                "nacimiento",
            ],
            CanonicalField::Program => &[
                "programa",
                "program",
                "program type",
                "tipo de programa",
                "programa de interes",
            ],
            CanonicalField::Country => &["pais", "country"],
            CanonicalField::City => &["ciudad", "city"],
            CanonicalField::InterestLevel => &[
                "nivel de interes",
                "interest level",
                "interes",
                "interest",
            ],
        }
    }

    /// Looks up the field a (raw) header names, if any.
    pub fn from_header(raw: &str) -> Option<CanonicalField> {
        let folded = fold(raw);
        CanonicalField::ALL
            .into_iter()
            .find(|field| field.variants().contains(&folded.as_str()))
    }
}

/// A resolved column: its position and the header exactly as found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub index: usize,
    pub raw_header: String,
}

/// Canonical field to column map, built once per table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHeaders {
    columns: HashMap<CanonicalField, ResolvedColumn>,
}

impl ResolvedHeaders {
    pub fn contains(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn column(&self, field: CanonicalField) -> Option<&ResolvedColumn> {
        self.columns.get(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The cell for `field` in `row`, skipping empty cells.
    pub fn cell<'a>(&self, field: CanonicalField, row: &'a [CellValue]) -> Option<&'a CellValue> {
        let column = self.columns.get(&field)?;
        row.get(column.index).filter(|cell| !cell.is_empty())
    }

    /// Text value of `field` in `row`.
    pub fn text(&self, field: CanonicalField, row: &[CellValue]) -> Option<String> {
        self.cell(field, row).and_then(CellValue::as_text)
    }
}

/// Resolves raw headers to canonical fields.
///
/// The first column matching a field wins; each column maps to at most one field.
pub fn resolve_headers(raw_headers: &[String]) -> ResolvedHeaders {
    let mut columns = HashMap::new();
    for (index, raw) in raw_headers.iter().enumerate() {
        if let Some(field) = CanonicalField::from_header(raw) {
            columns.entry(field).or_insert_with(|| ResolvedColumn {
                index,
                raw_header: raw.clone(),
            });
        }
    }
    ResolvedHeaders { columns }
}

/// Picks the header row: the first of the leading rows that resolves a name
/// column, otherwise the first non-empty row.
pub fn detect_header_row(rows: &[Vec<CellValue>]) -> Option<usize> {
    let non_empty = |row: &Vec<CellValue>| row.iter().any(|c| !c.is_empty());

    rows.iter()
        .enumerate()
        .take(HEADER_SCAN_ROWS)
        .filter(|(_, row)| non_empty(row))
        .find(|(_, row)| resolve_headers(&header_texts(row)).contains(CanonicalField::FullName))
        .map(|(idx, _)| idx)
        .or_else(|| rows.iter().position(non_empty))
}

/// Header strings for a row; empty cells become empty strings.
pub fn header_texts(row: &[CellValue]) -> Vec<String> {
    row.iter()
        .map(|c| c.as_text().unwrap_or_default())
        .collect()
}
