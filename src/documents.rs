//! Directory-based document indexing.
//!
//! A person folder is any directory that directly holds document files and
//! whose name passes the folder sanitizer. All files below it (including
//! nested folders) belong to that person.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::classifier::{infer_program, UNKNOWN_PROGRAM};
use crate::extractor::is_spreadsheet;
use crate::models::DocumentType;
use crate::normalize::{fold, normalize_name};
use crate::sanitizer;

/// Read buffer for checksums; keeps memory bounded for large files.
const CHUNK_SIZE: usize = 64 * 1024;

/// Keyword table, checked in order; first match wins.
const DOCUMENT_KEYWORDS: &[(DocumentType, &[&str])] = &[
    (DocumentType::Passport, &["passport", "pasaporte"]),
    (DocumentType::Visa, &["visa", "ds160", "ds 160", "ds2019", "ds 2019", "sevis"]),
    (DocumentType::Diploma, &["diploma", "titulo", "acta de grado", "degree"]),
    (
        DocumentType::Transcript,
        &["transcript", "notas", "calificaciones", "grades", "certificado de estudio"],
    ),
    (DocumentType::Photo, &["photo", "foto", "picture", "selfie"]),
    (
        DocumentType::Financial,
        &["bank", "banco", "bancario", "extracto", "financial", "financiero", "pago", "payment", "recibo", "receipt", "factura", "invoice"],
    ),
    (
        DocumentType::Medical,
        &["medical", "medico", "salud", "health", "vacuna", "vaccine", "seguro"],
    ),
    (
        DocumentType::IdCard,
        &["cedula", "id card", "idcard", "identificacion", "tarjeta de identidad", "dni"],
    ),
    (DocumentType::Letter, &["letter", "carta", "recomendacion"]),
    (DocumentType::Resume, &["resume", "cv", "curriculum", "hoja de vida"]),
    (DocumentType::Contract, &["contract", "contrato", "agreement", "acuerdo"]),
    (
        DocumentType::BackgroundCheck,
        &["background", "antecedentes", "policia", "police", "judicial", "procuraduria"],
    ),
    (DocumentType::EmergencyContact, &["emergency", "emergencia"]),
    (DocumentType::Quotation, &["quotation", "cotizacion", "quote"]),
];

/// One file inside a person folder.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub path: PathBuf,
    pub original_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub document_type: DocumentType,
    pub checksum: String,
}

/// A directory named after a person, with its documents.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonFolder {
    pub path: PathBuf,
    pub folder_name: String,
    pub normalized_name: String,
    pub program: String,
    pub documents: Vec<IndexedDocument>,
}

#[derive(Debug, Default)]
pub struct DocumentIndex {
    pub folders: Vec<PersonFolder>,
    pub files_indexed: usize,
    /// Identical content found twice in the same folder.
    pub duplicates_skipped: usize,
    pub files_failed: usize,
    pub folders_rejected: usize,
}

/// Hex-encoded SHA-256 of a file, read in fixed-size chunks.
pub fn compute_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// MIME type from the file extension.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Document type from file name keywords.
///
/// Single-word keywords match the start of a word; phrases match anywhere.
pub fn document_type(file_name: &str) -> DocumentType {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let folded = fold(&stem.replace(['_', '-', '.'], " "));
    let words: Vec<&str> = folded.split(' ').collect();

    DOCUMENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords.iter().any(|kw| {
                if kw.contains(' ') {
                    folded.contains(kw)
                } else {
                    words.iter().any(|w| w.starts_with(kw))
                }
            })
        })
        .map(|(doc_type, _)| *doc_type)
        .unwrap_or(DocumentType::Other)
}

/// Normalized storage name, e.g. `PASSPORT_01.pdf`.
///
/// Sequence numbers are assigned per student and type when the document is staged.
pub fn normalized_file_name(doc_type: DocumentType, sequence: usize, path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    format!("{}_{:02}{}", doc_type.as_str(), sequence, ext)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n.starts_with("~$"))
        .unwrap_or(true)
}

/// Whether a directory directly holds at least one non-spreadsheet file.
fn has_direct_documents(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).any(|entry| {
            let path = entry.path();
            entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                && !is_hidden(&path)
                && !is_spreadsheet(&path)
        }),
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", dir.display(), e);
            false
        }
    }
}

/// Walks the source tree and builds per-person document sets.
pub fn index_documents(root: &Path) -> DocumentIndex {
    let mut index = DocumentIndex::default();
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() || is_hidden(entry.path()) {
            continue;
        }
        if !has_direct_documents(entry.path()) {
            continue;
        }

        let folder_name = entry.file_name().to_string_lossy().trim().to_string();
        if sanitizer::is_false_positive(&folder_name) {
            tracing::debug!("Not a person folder: {}", entry.path().display());
            index.folders_rejected += 1;
            continue;
        }

        walker.skip_current_dir();
        let folder = index_folder(entry.path(), &folder_name, &mut index);
        tracing::debug!(
            "Indexed folder '{}' ({} documents, program {})",
            folder.folder_name,
            folder.documents.len(),
            folder.program
        );
        index.folders.push(folder);
    }

    tracing::info!(
        "Indexed {} person folders, {} documents ({} duplicates, {} failed, {} folders rejected)",
        index.folders.len(),
        index.files_indexed,
        index.duplicates_skipped,
        index.files_failed,
        index.folders_rejected
    );
    index
}

fn index_folder(path: &Path, folder_name: &str, index: &mut DocumentIndex) -> PersonFolder {
    let program = path
        .parent()
        .and_then(|p| p.to_str())
        .and_then(infer_program)
        .unwrap_or(UNKNOWN_PROGRAM)
        .to_string();

    let mut seen: HashSet<String> = HashSet::new();
    let mut documents = Vec::new();

    let files = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && !is_hidden(e.path()));

    for entry in files {
        let file_path = entry.path();
        let checksum = match compute_checksum(file_path) {
            Ok(checksum) => checksum,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", file_path.display(), e);
                index.files_failed += 1;
                continue;
            }
        };
        if !seen.insert(checksum.clone()) {
            tracing::debug!("Duplicate content skipped: {}", file_path.display());
            index.duplicates_skipped += 1;
            continue;
        }

        let original_name = entry.file_name().to_string_lossy().to_string();
        let doc_type = document_type(&original_name);

        let size_bytes = entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
        documents.push(IndexedDocument {
            path: file_path.to_path_buf(),
            original_name,
            size_bytes,
            mime_type: mime_type(file_path).to_string(),
            document_type: doc_type,
            checksum,
        });
        index.files_indexed += 1;
    }

    PersonFolder {
        path: path.to_path_buf(),
        folder_name: folder_name.to_string(),
        normalized_name: normalize_name(folder_name),
        program,
        documents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn document_types_by_keyword() {
        assert_eq!(document_type("Pasaporte Ana.pdf"), DocumentType::Passport);
        assert_eq!(document_type("DS-160_confirmation.pdf"), DocumentType::Visa);
        assert_eq!(document_type("foto_fondo_blanco.jpg"), DocumentType::Photo);
        assert_eq!(document_type("hoja de vida 2024.docx"), DocumentType::Resume);
        assert_eq!(document_type("CV.pdf"), DocumentType::Resume);
        assert_eq!(document_type("antecedentes-policia.pdf"), DocumentType::BackgroundCheck);
        assert_eq!(document_type("revisar.pdf"), DocumentType::Other);
        assert_eq!(document_type("scan001.pdf"), DocumentType::Other);
    }

    #[test]
    fn mime_and_file_names() {
        assert_eq!(mime_type(Path::new("a/B.PDF")), "application/pdf");
        assert_eq!(mime_type(Path::new("a/b.unknown")), "application/octet-stream");
        assert_eq!(
            normalized_file_name(DocumentType::Passport, 1, Path::new("x/Pasaporte.PDF")),
            "PASSPORT_01.pdf"
        );
    }

    #[test]
    fn checksum_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            compute_checksum(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn indexes_person_folders_under_program_tree() {
        let dir = tempfile::tempdir().unwrap();
        let person = dir.path().join("AU PAIR").join("2023").join("ANA MARIA GOMEZ");
        fs::create_dir_all(person.join("visa")).unwrap();
        fs::write(person.join("pasaporte.pdf"), b"passport bytes").unwrap();
        fs::write(person.join("pasaporte copia.pdf"), b"passport bytes").unwrap();
        fs::write(person.join("visa").join("ds160.pdf"), b"visa bytes").unwrap();
        fs::write(dir.path().join("AU PAIR").join("2023").join("lista.xlsx"), b"x").unwrap();

        let index = index_documents(dir.path());
        assert_eq!(index.folders.len(), 1);
        let folder = &index.folders[0];
        assert_eq!(folder.normalized_name, "ANA MARIA GOMEZ");
        assert_eq!(folder.program, "Au Pair");
        assert_eq!(folder.documents.len(), 2);
        assert_eq!(index.duplicates_skipped, 1);
        assert!(folder
            .documents
            .iter()
            .any(|d| d.document_type == DocumentType::Visa && d.original_name == "ds160.pdf"));
    }

    #[test]
    fn administrative_folders_are_not_people() {
        let dir = tempfile::tempdir().unwrap();
        let admin = dir.path().join("WAT 2024");
        fs::create_dir_all(&admin).unwrap();
        fs::write(admin.join("instrucciones.pdf"), b"x").unwrap();

        let index = index_documents(dir.path());
        assert!(index.folders.is_empty());
        assert_eq!(index.folders_rejected, 1);
    }
}
