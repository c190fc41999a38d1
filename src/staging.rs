//! Persistence of ingested records into the staging store.
//!
//! Persons and students are resolved against the store's existing persons
//! with the same [`IdentityIndex`] policy used during extraction. Every
//! row-level failure is recorded as a [`FailureRecord`] and the run goes on;
//! only fatal store errors (lost connection) abort it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::documents::{compute_checksum, normalized_file_name, IndexedDocument};
use crate::enricher::StudentCandidate;
use crate::errors::{AppError, StoreError};
use crate::identity::{IdentityIndex, PersonPlan};
use crate::models::{
    Document, FailureRecord, IngestionRun, Lead, Person, ReferenceRecord, Student,
};

/// Subdirectory of the staging dir holding `<student_id>/<file name>` copies.
pub const DOCUMENTS_DIR: &str = "documents";

/// A pending write for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Write<T> {
    Insert(T),
    Update(T),
    Keep,
}

impl<T> Write<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Write::Keep)
    }
}

impl From<&PersonPlan> for Write<Person> {
    fn from(plan: &PersonPlan) -> Self {
        match plan {
            PersonPlan::Create(person) => Write::Insert(person.clone()),
            PersonPlan::Update { person, .. } => Write::Update(person.clone()),
            PersonPlan::Unchanged { .. } => Write::Keep,
        }
    }
}

/// Result of a lead upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Staging persistence seam.
///
/// Implementations report failures as typed [`StoreError`]s. A person and its
/// student are written together, atomically.
#[allow(async_fn_in_trait)]
pub trait StagingStore {
    /// All staging persons, oldest first.
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError>;
    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError>;
    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError>;
    async fn document_exists(&mut self, student_id: Uuid, checksum: &str) -> Result<bool, StoreError>;
    /// Normalized file names already registered for a student.
    async fn document_names(&mut self, student_id: Uuid) -> Result<Vec<String>, StoreError>;
    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError>;
    /// Inserts a lead, or on a uniqueness conflict updates only status, notes and updated_at.
    async fn upsert_lead(&mut self, lead: &Lead) -> Result<UpsertOutcome, StoreError>;
    async fn insert_reference(&mut self, record: &ReferenceRecord) -> Result<(), StoreError>;
    async fn record_failure(&mut self, failure: &FailureRecord) -> Result<(), StoreError>;
    async fn begin_run(&mut self, run: &IngestionRun) -> Result<(), StoreError>;
    async fn finish_run(&mut self, run: &IngestionRun) -> Result<(), StoreError>;
}

/// Per-entity counters for one persistence phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagingCounts {
    pub persons_created: usize,
    pub persons_updated: usize,
    pub persons_unchanged: usize,
    pub students_created: usize,
    pub students_updated: usize,
    pub documents_created: usize,
    /// Documents already present for the student (same checksum).
    pub documents_skipped: usize,
    pub leads_inserted: usize,
    pub leads_updated: usize,
    pub leads_unchanged: usize,
    pub references_inserted: usize,
    pub failures: usize,
}

/// Writes candidates into a [`StagingStore`], one entity row at a time.
pub struct StagingWriter<'s, S: StagingStore> {
    store: &'s mut S,
    run_id: Uuid,
    staging_dir: Option<PathBuf>,
    persons: IdentityIndex,
    students_by_person: HashMap<Uuid, Student>,
    file_names: HashMap<Uuid, HashSet<String>>,
    pub counts: StagingCounts,
}

impl<'s, S: StagingStore> StagingWriter<'s, S> {
    /// Loads existing staging persons and students into memory.
    pub async fn load(store: &'s mut S, run_id: Uuid, staging_dir: Option<PathBuf>) -> Result<Self, AppError> {
        let persons = IdentityIndex::from_persons(store.load_persons().await?);
        let students_by_person = store
            .load_students()
            .await?
            .into_iter()
            .map(|s| (s.person_id, s))
            .collect();
        tracing::debug!("Loaded {} staging persons", persons.len());

        Ok(Self {
            store,
            run_id,
            staging_dir,
            persons,
            students_by_person,
            file_names: HashMap::new(),
            counts: StagingCounts::default(),
        })
    }

    /// Records a row failure. Fatal errors are returned instead.
    async fn fail(
        &mut self,
        err: StoreError,
        payload: serde_json::Value,
        source_file: Option<String>,
        source_sheet: Option<String>,
    ) -> Result<(), AppError> {
        if err.is_fatal() {
            return Err(AppError::StoreError(err));
        }
        tracing::warn!("Row failed ({}): {}", err.kind(), err);
        self.counts.failures += 1;

        let failure = FailureRecord::new(
            Some(self.run_id),
            payload,
            &err.to_string(),
            err.kind(),
            source_file,
            source_sheet,
        );
        if let Err(e) = self.store.record_failure(&failure).await {
            if e.is_fatal() {
                return Err(AppError::StoreError(e));
            }
            tracing::error!("Could not record failure {}: {}", failure.id, e);
        }
        Ok(())
    }

    /// Persists students: person and student rows, then their documents.
    pub async fn write_students(&mut self, candidates: &[StudentCandidate]) -> Result<(), AppError> {
        for candidate in candidates {
            let plan = self.persons.plan(&candidate.person);
            let person_id = plan.person_id();

            let mut student = Student::new(person_id, &candidate.program, candidate.status);
            student.source_path = candidate.source_path.clone();
            student.enrichment_flag = candidate.person.enrichment_flag;

            let student_write = match self.students_by_person.get(&person_id) {
                Some(existing) => {
                    let mut merged = existing.clone();
                    if merged.merge_missing(&student) {
                        Write::Update(merged)
                    } else {
                        Write::Keep
                    }
                }
                None => Write::Insert(student),
            };
            let person_write = Write::from(&plan);

            if !(person_write.is_keep() && student_write.is_keep()) {
                if let Err(e) = self.store.write_student(&person_write, &student_write).await {
                    let payload = serde_json::to_value(&candidate.person).unwrap_or_default();
                    self.fail(
                        e,
                        payload,
                        candidate.person.source_file.clone(),
                        candidate.person.source_sheet.clone(),
                    )
                    .await?;
                    continue;
                }
            }

            match &plan {
                PersonPlan::Create(_) => self.counts.persons_created += 1,
                PersonPlan::Update { matched_on, .. } => {
                    tracing::debug!("Person {} filled via {}", person_id, matched_on.label());
                    self.counts.persons_updated += 1;
                }
                PersonPlan::Unchanged { .. } => self.counts.persons_unchanged += 1,
            }
            self.persons.commit(&plan);

            let student_id = match student_write {
                Write::Insert(s) => {
                    self.counts.students_created += 1;
                    let id = s.id;
                    self.students_by_person.insert(person_id, s);
                    id
                }
                Write::Update(s) => {
                    self.counts.students_updated += 1;
                    let id = s.id;
                    self.students_by_person.insert(person_id, s);
                    id
                }
                Write::Keep => match self.students_by_person.get(&person_id) {
                    Some(s) => s.id,
                    None => continue,
                },
            };

            for document in &candidate.documents {
                self.write_document(student_id, document).await?;
            }
        }

        tracing::info!(
            "Students staged: persons +{} ~{}, students +{} ~{}, documents +{} (skipped {})",
            self.counts.persons_created,
            self.counts.persons_updated,
            self.counts.students_created,
            self.counts.students_updated,
            self.counts.documents_created,
            self.counts.documents_skipped
        );
        Ok(())
    }

    /// Next free `<DOCTYPE>_<NN><ext>` name for the student, numbered per type.
    async fn next_file_name(&mut self, student_id: Uuid, indexed: &IndexedDocument) -> Result<String, StoreError> {
        if !self.file_names.contains_key(&student_id) {
            let names = self.store.document_names(student_id).await?;
            self.file_names.insert(student_id, names.into_iter().collect());
        }
        let used = self.file_names.entry(student_id).or_default();

        let mut sequence = 1;
        loop {
            let name = normalized_file_name(indexed.document_type, sequence, &indexed.path);
            if !used.contains(&name) {
                return Ok(name);
            }
            sequence += 1;
        }
    }

    /// Registers one document; an existing (student, checksum) row short-circuits the copy.
    async fn write_document(&mut self, student_id: Uuid, indexed: &IndexedDocument) -> Result<(), AppError> {
        match self.store.document_exists(student_id, &indexed.checksum).await {
            Ok(true) => {
                self.counts.documents_skipped += 1;
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                let payload = serde_json::json!({
                    "student_id": student_id,
                    "path": indexed.path.display().to_string(),
                });
                return self.fail(e, payload, Some(indexed.path.display().to_string()), None).await;
            }
        }

        let file_name = match self.next_file_name(student_id, indexed).await {
            Ok(name) => name,
            Err(e) => {
                let payload = serde_json::json!({
                    "student_id": student_id,
                    "path": indexed.path.display().to_string(),
                });
                return self.fail(e, payload, Some(indexed.path.display().to_string()), None).await;
            }
        };

        let storage_path = match self.staging_dir.clone() {
            Some(dir) => {
                let target = dir
                    .join(DOCUMENTS_DIR)
                    .join(student_id.to_string())
                    .join(&file_name);
                if let Err(e) = copy_document(&indexed.path, &target, &indexed.checksum).await {
                    tracing::warn!("Could not copy {}: {}", indexed.path.display(), e);
                    let payload = serde_json::json!({
                        "student_id": student_id,
                        "path": indexed.path.display().to_string(),
                    });
                    return self
                        .fail(
                            StoreError::Other(format!("copy failed: {}", e)),
                            payload,
                            Some(indexed.path.display().to_string()),
                            None,
                        )
                        .await;
                }
                target
            }
            None => indexed.path.clone(),
        };

        let document = Document {
            id: Uuid::new_v4(),
            student_id,
            original_name: indexed.original_name.clone(),
            file_name: file_name.clone(),
            storage_path: storage_path.display().to_string(),
            size_bytes: indexed.size_bytes,
            mime_type: indexed.mime_type.clone(),
            document_type: indexed.document_type,
            checksum: indexed.checksum.clone(),
            created_at: chrono::Utc::now(),
        };

        match self.store.insert_document(&document).await {
            Ok(()) => {
                self.counts.documents_created += 1;
                self.file_names.entry(student_id).or_default().insert(file_name);
                Ok(())
            }
            Err(e) => {
                let payload = serde_json::to_value(&document).unwrap_or_default();
                self.fail(e, payload, Some(indexed.path.display().to_string()), None)
                    .await
            }
        }
    }

    /// Upserts leads one row at a time.
    pub async fn write_leads(&mut self, leads: &[Lead]) -> Result<(), AppError> {
        for lead in leads {
            match self.store.upsert_lead(lead).await {
                Ok(UpsertOutcome::Inserted) => self.counts.leads_inserted += 1,
                Ok(UpsertOutcome::Updated) => self.counts.leads_updated += 1,
                Ok(UpsertOutcome::Unchanged) => self.counts.leads_unchanged += 1,
                Err(e) => {
                    let payload = serde_json::to_value(lead).unwrap_or_default();
                    self.fail(
                        e,
                        payload,
                        Some(lead.source_file.clone()),
                        Some(lead.source_sheet.clone()),
                    )
                    .await?;
                }
            }
        }

        tracing::info!(
            "Leads staged: {} inserted, {} updated, {} unchanged",
            self.counts.leads_inserted,
            self.counts.leads_updated,
            self.counts.leads_unchanged
        );
        Ok(())
    }

    pub async fn write_references(&mut self, records: &[ReferenceRecord]) -> Result<(), AppError> {
        for record in records {
            match self.store.insert_reference(record).await {
                Ok(()) => self.counts.references_inserted += 1,
                Err(e) => {
                    let payload = serde_json::json!({
                        "data_type": record.data_type,
                        "row_count": record.payload.get("row_count"),
                    });
                    self.fail(
                        e,
                        payload,
                        Some(record.source_file.clone()),
                        Some(record.source_sheet.clone()),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

/// Copies a document into staging and checks the copy against its checksum.
///
/// An existing target is kept only when it already holds the same content.
async fn copy_document(from: &Path, to: &Path, checksum: &str) -> std::io::Result<()> {
    if tokio::fs::try_exists(to).await? && compute_checksum(to)? == checksum {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;

    if compute_checksum(to)? != checksum {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} changed while being copied", from.display()),
        ));
    }
    Ok(())
}

/// Deletes `<staging_dir>/documents`. Returns `false` when there was nothing to remove.
pub async fn remove_staged_documents(staging_dir: &Path) -> std::io::Result<bool> {
    let documents = staging_dir.join(DOCUMENTS_DIR);
    if !tokio::fs::try_exists(&documents).await? {
        return Ok(false);
    }
    tokio::fs::remove_dir_all(&documents).await?;
    tracing::warn!("Removed staged documents under {}", documents.display());
    Ok(true)
}
