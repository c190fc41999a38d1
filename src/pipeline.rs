//! Ingest orchestration: extract, classify, normalize, resolve, enrich, persist.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::documents::index_documents;
use crate::enricher::enrich;
use crate::errors::{AppError, ResultExt};
use crate::extractor::extract_all;
use crate::models::{Classification, IngestionRun, RunStatus};
use crate::records::{collect_leads, collect_students, reference_record};
use crate::staging::{StagingCounts, StagingStore, StagingWriter};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub source_dir: PathBuf,
    /// Where document copies go. `None` keeps documents at their source path.
    pub staging_dir: Option<PathBuf>,
}

/// Aggregate statistics of one ingest run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub source_dir: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub student_sheets: usize,
    pub lead_sheets: usize,
    pub reference_sheets: usize,
    pub rows_seen: usize,
    pub rows_skipped: usize,
    pub duplicates_merged: usize,
    pub person_folders: usize,
    pub folders_rejected: usize,
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub enriched_students: usize,
    pub spreadsheet_only_students: usize,
    pub staging: StagingCounts,
}

impl IngestReport {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Entity counts stored on the ingestion run.
    pub fn counts(&self) -> serde_json::Value {
        serde_json::to_value(self.staging).unwrap_or_default()
    }
}

/// Runs a full ingest against `store`.
///
/// The ingestion run is opened before any work and closed as COMPLETED with
/// the aggregate counts, or as FAILED when a fatal error aborts the run.
pub async fn run_ingest<S: StagingStore>(store: &mut S, options: &IngestOptions) -> Result<IngestReport, AppError> {
    if !options.source_dir.is_dir() {
        return Err(AppError::SourceNotFound(options.source_dir.display().to_string()));
    }

    let mut run = IngestionRun {
        id: Uuid::new_v4(),
        source_path: options.source_dir.display().to_string(),
        started_at: Utc::now(),
        completed_at: None,
        status: RunStatus::Running,
        counts: serde_json::json!({}),
    };
    store
        .begin_run(&run)
        .await
        .context("Failed to open ingestion run")?;
    tracing::info!("Ingestion run {} started for {}", run.id, run.source_path);

    match ingest(store, options, run.id).await {
        Ok(report) => {
            run.completed_at = Some(Utc::now());
            run.status = RunStatus::Completed;
            run.counts = report.counts();
            store
                .finish_run(&run)
                .await
                .context("Failed to close ingestion run")?;
            tracing::info!(
                "Ingestion run {} completed with {} failures",
                run.id,
                report.staging.failures
            );
            Ok(report)
        }
        Err(e) => {
            tracing::error!("Ingestion run {} aborted: {}", run.id, e);
            run.completed_at = Some(Utc::now());
            run.status = RunStatus::Failed;
            run.counts = serde_json::json!({ "error": e.to_string() });
            if let Err(finish_err) = store.finish_run(&run).await {
                tracing::error!("Could not mark run {} as failed: {}", run.id, finish_err);
            }
            Err(e)
        }
    }
}

async fn ingest<S: StagingStore>(store: &mut S, options: &IngestOptions, run_id: Uuid) -> Result<IngestReport, AppError> {
    let mut report = IngestReport {
        run_id,
        source_dir: options.source_dir.display().to_string(),
        ..Default::default()
    };

    tracing::info!("Step 1: Extracting spreadsheets");
    let extraction = extract_all(&options.source_dir);
    report.files_scanned = extraction.files_scanned;
    report.files_skipped = extraction.files_skipped;

    tracing::info!("Step 2: Classifying {} tables", extraction.tables.len());
    for table in &extraction.tables {
        tracing::debug!(
            "{} / {} -> {}",
            table.file_name(),
            table.sheet_name,
            table.classification
        );
        match table.classification {
            Classification::Student => report.student_sheets += 1,
            Classification::Lead => report.lead_sheets += 1,
            Classification::Reference => report.reference_sheets += 1,
        }
    }

    tracing::info!("Step 3: Normalizing and resolving identities");
    let (students, student_stats) = collect_students(&extraction.tables);
    let (leads, lead_stats) = collect_leads(&extraction.tables);
    let references: Vec<_> = extraction
        .tables
        .iter()
        .filter(|t| t.classification == Classification::Reference)
        .map(reference_record)
        .collect();
    report.rows_seen = student_stats.rows_seen + lead_stats.rows_seen;
    report.rows_skipped = student_stats.rows_skipped + lead_stats.rows_skipped;
    report.duplicates_merged = student_stats.duplicates_merged + lead_stats.duplicates_merged;
    tracing::info!(
        "Resolved {} students, {} leads, {} reference tables",
        students.len(),
        leads.len(),
        references.len()
    );

    tracing::info!("Step 4: Indexing document folders");
    let documents = index_documents(&options.source_dir);
    report.person_folders = documents.folders.len();
    report.folders_rejected = documents.folders_rejected;
    report.documents_indexed = documents.files_indexed;
    report.documents_failed = documents.files_failed;

    tracing::info!("Step 5: Enriching directory students");
    let (candidates, enrichment) = enrich(documents.folders, &students, &leads);
    report.enriched_students = enrichment.enriched;
    report.spreadsheet_only_students = enrichment.spreadsheet_only;

    tracing::info!("Step 6: Writing to staging");
    let mut writer = StagingWriter::load(store, run_id, options.staging_dir.clone()).await?;
    writer.write_students(&candidates).await?;
    writer.write_leads(&leads).await?;
    writer.write_references(&references).await?;
    report.staging = writer.counts;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStagingStore;

    #[tokio::test]
    async fn missing_source_dir_is_fatal_before_any_run() {
        let mut store = MemoryStagingStore::new();
        let options = IngestOptions {
            source_dir: PathBuf::from("/definitely/not/here"),
            staging_dir: None,
        };
        let err = run_ingest(&mut store, &options).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(store.runs.is_empty());
    }

    #[tokio::test]
    async fn documents_and_csv_leads_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Au Pair").join("2023").join("ANA GOMEZ");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("pasaporte.pdf"), b"passport bytes").unwrap();
        std::fs::write(
            dir.path().join("leads_2024.csv"),
            "Nombre,Correo\nAna Gómez,ana@example.com\nLuis Perez,luis@example.com\n",
        )
        .unwrap();

        let mut store = MemoryStagingStore::new();
        let options = IngestOptions {
            source_dir: dir.path().to_path_buf(),
            staging_dir: None,
        };
        let report = run_ingest(&mut store, &options).await.unwrap();

        assert_eq!(report.lead_sheets, 1);
        assert_eq!(report.person_folders, 1);
        assert_eq!(report.enriched_students, 1);
        assert_eq!(store.students.len(), 1);
        assert_eq!(store.documents.len(), 1);
        assert_eq!(store.leads.len(), 2);
        assert_eq!(store.persons[0].email.as_deref(), Some("ana@example.com"));
        assert_eq!(store.runs[0].status, RunStatus::Completed);
    }
}
