/// End-to-end tests: real workbooks and document folders in a temp dir,
/// ingested into the in-memory staging store and migrated to production.
use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rust_ice_ingest::documents::compute_checksum;
use rust_ice_ingest::errors::StoreError;
use rust_ice_ingest::memory_store::{MemoryProductionStore, MemoryStagingStore};
use rust_ice_ingest::migrator::run_migration;
use rust_ice_ingest::models::{
    DataSource, Document, FailureKind, FailureRecord, IngestionRun, Lead, Person, ReferenceRecord,
    RunStatus, Student,
};
use rust_ice_ingest::pipeline::{run_ingest, IngestOptions};
use rust_ice_ingest::staging::{StagingStore, UpsertOutcome, Write};

enum Cell {
    Text(&'static str),
    Number(f64),
    Blank,
}

fn write_sheet(path: &Path, sheet: &str, headers: &[&str], rows: &[Vec<Cell>]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet).unwrap();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                Cell::Text(text) => {
                    worksheet.write_string(r, c, *text).unwrap();
                }
                Cell::Number(n) => {
                    worksheet.write_number(r, c, *n).unwrap();
                }
                Cell::Blank => {}
            }
        }
    }
    workbook.save(path).unwrap();
}

const LEADS: [(&str, &str); 10] = [
    ("Ana Gómez", "ana@example.com"),
    ("Marta Díaz", "marta.diaz@example.com"),
    ("Jorge Rojas", "jorge.rojas@example.com"),
    ("Sofía Castro", "sofia.castro@example.com"),
    ("Pablo Mejía", "pablo.mejia@example.com"),
    ("Lucía Vargas", "lucia.vargas@example.com"),
    ("Andrés Mora", "andres.mora@example.com"),
    ("Camila Ríos", "camila.rios@example.com"),
    ("Felipe Soto", "felipe.soto@example.com"),
    ("Valentina Gil", "valentina.gil@example.com"),
];

fn write_leads(root: &Path) {
    let rows: Vec<Vec<Cell>> = LEADS
        .iter()
        .map(|&(name, email)| vec![Cell::Text(name), Cell::Text(email), Cell::Blank])
        .collect();
    write_sheet(
        &root.join("leads_2024.xlsx"),
        "Interesados",
        &["Nombre", "Correo", "Celular"],
        &rows,
    );
}

/// Students workbook, leads workbook, a price list and two person folders.
fn build_source_tree(root: &Path) {
    write_sheet(
        &root.join("students_2023.xlsx"),
        "Participantes",
        &["Nombre Completo", "Correo Electrónico", "Cédula", "Fecha de Nacimiento", "Programa", "Celular"],
        &[
            vec![
                Cell::Text("Ana Gómez"),
                Cell::Text("ana@example.com"),
                Cell::Number(1023456789.0),
                Cell::Text("25/ sep/1999"),
                Cell::Text("Au Pair"),
                Cell::Blank,
            ],
            vec![
                Cell::Text("Luis Pérez"),
                Cell::Text("luis@example.com"),
                Cell::Number(80123456.0),
                Cell::Number(44200.0),
                Cell::Text("Work and Travel"),
                Cell::Blank,
            ],
            vec![
                Cell::Text("ANA GOMEZ"),
                Cell::Blank,
                Cell::Number(1023456789.0),
                Cell::Text("26 años"),
                Cell::Blank,
                Cell::Text("300 123 4567"),
            ],
        ],
    );
    write_leads(root);
    write_sheet(
        &root.join("Tarifas.xlsx"),
        "Reporte General",
        &["Concepto", "Valor"],
        &[
            vec![Cell::Text("Au Pair"), Cell::Number(1500.0)],
            vec![Cell::Text("Work and Travel"), Cell::Number(2300.0)],
        ],
    );

    let ana = root.join("Au Pair").join("2023").join("ANA GOMEZ");
    std::fs::create_dir_all(&ana).unwrap();
    std::fs::write(ana.join("pasaporte.pdf"), b"ana passport scan").unwrap();
    std::fs::write(ana.join("copia pasaporte.pdf"), b"ana passport scan").unwrap();

    let carlos = root.join("Work and Travel").join("2024").join("CARLOS RUIZ");
    std::fs::create_dir_all(&carlos).unwrap();
    std::fs::write(carlos.join("visa.pdf"), b"carlos visa").unwrap();
}

fn options(root: &Path) -> IngestOptions {
    IngestOptions {
        source_dir: root.to_path_buf(),
        staging_dir: None,
    }
}

fn person<'a>(store: &'a MemoryStagingStore, name: &str) -> &'a Person {
    store
        .persons
        .iter()
        .find(|p| p.normalized_name == name)
        .unwrap()
}

/// Every staged copy holds the bytes its row claims, under a name unique to its student.
fn assert_copies_match(store: &MemoryStagingStore) {
    let mut names = HashSet::new();
    for document in &store.documents {
        let on_disk = compute_checksum(Path::new(&document.storage_path)).unwrap();
        assert_eq!(on_disk, document.checksum, "{}", document.storage_path);
        assert!(
            names.insert((document.student_id, document.file_name.clone())),
            "{} used twice",
            document.file_name
        );
    }
}

#[cfg(test)]
mod ingest_tests {
    use super::*;

    #[tokio::test]
    async fn first_run_stages_every_entity() {
        let dir = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();

        let report = run_ingest(&mut store, &options(dir.path())).await.unwrap();

        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.student_sheets, 1);
        assert_eq!(report.lead_sheets, 1);
        assert_eq!(report.reference_sheets, 1);
        assert_eq!(report.duplicates_merged, 1);
        assert_eq!(report.person_folders, 2);
        assert_eq!(report.staging.failures, 0);

        assert_eq!(store.persons.len(), 3);
        assert_eq!(store.students.len(), 3);
        assert_eq!(store.documents.len(), 2);
        assert_eq!(store.leads.len(), 10);
        assert_eq!(store.references.len(), 1);
        assert_eq!(store.runs[0].status, RunStatus::Completed);
        assert_eq!(store.runs[0].counts["students_created"], 3);
    }

    #[tokio::test]
    async fn spreadsheet_fields_enrich_directory_students() {
        let dir = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        run_ingest(&mut store, &options(dir.path())).await.unwrap();

        let ana = person(&store, "ANA GOMEZ");
        assert_eq!(ana.data_source, DataSource::DirectoryAndSpreadsheet);
        assert!(ana.enrichment_flag);
        assert_eq!(ana.national_id.as_deref(), Some("1023456789"));
        assert_eq!(ana.birth_date, NaiveDate::from_ymd_opt(1999, 9, 25));
        assert_eq!(ana.phone.as_deref(), Some("+573001234567"));

        let luis = person(&store, "LUIS PEREZ");
        assert_eq!(luis.data_source, DataSource::Spreadsheet);
        assert_eq!(luis.birth_date, NaiveDate::from_ymd_opt(2021, 1, 4));

        let carlos = person(&store, "CARLOS RUIZ");
        let student = store.students.iter().find(|s| s.person_id == carlos.id).unwrap();
        assert_eq!(student.program, "Work and Travel");
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        run_ingest(&mut store, &options(dir.path())).await.unwrap();

        let second = run_ingest(&mut store, &options(dir.path())).await.unwrap();

        assert_eq!(second.staging.persons_created, 0);
        assert_eq!(second.staging.persons_updated, 0);
        assert_eq!(second.staging.students_created, 0);
        assert_eq!(second.staging.documents_created, 0);
        assert_eq!(second.staging.documents_skipped, 2);
        assert_eq!(second.staging.leads_inserted, 0);
        assert_eq!(second.staging.leads_unchanged, 10);
        assert_eq!(store.persons.len(), 3);
        assert_eq!(store.students.len(), 3);
        assert_eq!(store.documents.len(), 2);
        assert_eq!(store.runs.len(), 2);
    }

    #[tokio::test]
    async fn renamed_copies_of_a_document_are_not_registered_twice() {
        let dir = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        run_ingest(&mut store, &options(dir.path())).await.unwrap();

        let ana = dir.path().join("Au Pair").join("2023").join("ANA GOMEZ");
        std::fs::write(ana.join("scan_final.pdf"), b"ana passport scan").unwrap();
        let second = run_ingest(&mut store, &options(dir.path())).await.unwrap();

        assert_eq!(second.staging.documents_created, 0);
        assert_eq!(store.documents.len(), 2);
    }

    #[tokio::test]
    async fn documents_are_copied_under_the_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        let options = IngestOptions {
            source_dir: dir.path().to_path_buf(),
            staging_dir: Some(staging.path().to_path_buf()),
        };
        run_ingest(&mut store, &options).await.unwrap();

        let carlos = person(&store, "CARLOS RUIZ");
        let student = store.students.iter().find(|s| s.person_id == carlos.id).unwrap();
        let expected: PathBuf = staging
            .path()
            .join("documents")
            .join(student.id.to_string())
            .join("VISA_01.pdf");
        assert!(expected.exists());
        assert!(store
            .documents
            .iter()
            .any(|d| d.storage_path == expected.display().to_string()));
    }

    #[tokio::test]
    async fn folders_of_one_student_never_share_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        for (year, content) in [("2023", "old passport"), ("2024", "renewed passport")] {
            let folder = dir.path().join("Au Pair").join(year).join("ANA GOMEZ");
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join("pasaporte.pdf"), content).unwrap();
        }
        let mut store = MemoryStagingStore::new();
        let options = IngestOptions {
            source_dir: dir.path().to_path_buf(),
            staging_dir: Some(staging.path().to_path_buf()),
        };
        run_ingest(&mut store, &options).await.unwrap();

        assert_eq!(store.students.len(), 1);
        assert_eq!(store.documents.len(), 2);
        let mut names: Vec<_> = store.documents.iter().map(|d| d.file_name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["PASSPORT_01.pdf", "PASSPORT_02.pdf"]);
        assert_copies_match(&store);
    }

    #[tokio::test]
    async fn documents_added_between_runs_get_the_next_number() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        let options = IngestOptions {
            source_dir: dir.path().to_path_buf(),
            staging_dir: Some(staging.path().to_path_buf()),
        };
        run_ingest(&mut store, &options).await.unwrap();

        let carlos = dir.path().join("Work and Travel").join("2024").join("CARLOS RUIZ");
        std::fs::write(carlos.join("visa renovada.pdf"), b"carlos renewed visa").unwrap();
        let second = run_ingest(&mut store, &options).await.unwrap();

        assert_eq!(second.staging.documents_created, 1);
        let carlos_id = person(&store, "CARLOS RUIZ").id;
        let student = store.students.iter().find(|s| s.person_id == carlos_id).unwrap();
        let mut names: Vec<_> = store
            .documents
            .iter()
            .filter(|d| d.student_id == student.id)
            .map(|d| d.file_name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, ["VISA_01.pdf", "VISA_02.pdf"]);
        assert_copies_match(&store);
    }

    #[tokio::test]
    async fn missing_source_dir_exits_with_code_2() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStagingStore::new();
        let err = run_ingest(&mut store, &options(&dir.path().join("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

/// Staging store that rejects the n-th lead write with a uniqueness error.
struct RejectNthLead {
    inner: MemoryStagingStore,
    lead_calls: usize,
    reject_at: usize,
}

impl StagingStore for RejectNthLead {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
        self.inner.load_persons().await
    }

    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
        self.inner.load_students().await
    }

    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError> {
        self.inner.write_student(person, student).await
    }

    async fn document_exists(&mut self, student_id: uuid::Uuid, checksum: &str) -> Result<bool, StoreError> {
        self.inner.document_exists(student_id, checksum).await
    }

    async fn document_names(&mut self, student_id: uuid::Uuid) -> Result<Vec<String>, StoreError> {
        self.inner.document_names(student_id).await
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        self.inner.insert_document(document).await
    }

    async fn upsert_lead(&mut self, lead: &Lead) -> Result<UpsertOutcome, StoreError> {
        self.lead_calls += 1;
        if self.lead_calls == self.reject_at {
            return Err(StoreError::Duplicate(
                "duplicate key value violates unique constraint \"uq_staging_lead_email\"".into(),
            ));
        }
        self.inner.upsert_lead(lead).await
    }

    async fn insert_reference(&mut self, record: &ReferenceRecord) -> Result<(), StoreError> {
        self.inner.insert_reference(record).await
    }

    async fn record_failure(&mut self, failure: &FailureRecord) -> Result<(), StoreError> {
        self.inner.record_failure(failure).await
    }

    async fn begin_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        self.inner.begin_run(run).await
    }

    async fn finish_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        self.inner.finish_run(run).await
    }
}

#[cfg(test)]
mod failure_isolation_tests {
    use super::*;

    #[tokio::test]
    async fn one_bad_lead_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_leads(dir.path());
        let mut store = RejectNthLead {
            inner: MemoryStagingStore::new(),
            lead_calls: 0,
            reject_at: 5,
        };

        let report = run_ingest(&mut store, &options(dir.path())).await.unwrap();

        assert_eq!(report.staging.leads_inserted, 9);
        assert_eq!(report.staging.failures, 1);
        assert_eq!(store.inner.leads.len(), 9);
        assert_eq!(store.inner.failures.len(), 1);

        let failure = &store.inner.failures[0];
        assert_eq!(failure.error_type, FailureKind::Duplicate);
        assert_eq!(failure.run_id, Some(store.inner.runs[0].id));
        assert_eq!(failure.payload["email"], "pablo.mejia@example.com");
        assert!(!failure.resolved);
        assert_eq!(store.inner.runs[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn lost_connection_fails_the_run() {
        struct Disconnecting(MemoryStagingStore);

        impl StagingStore for Disconnecting {
            async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
                Err(StoreError::Connection("server closed the connection".into()))
            }
            async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
                self.0.load_students().await
            }
            async fn write_student(&mut self, p: &Write<Person>, s: &Write<Student>) -> Result<(), StoreError> {
                self.0.write_student(p, s).await
            }
            async fn document_exists(&mut self, id: uuid::Uuid, checksum: &str) -> Result<bool, StoreError> {
                self.0.document_exists(id, checksum).await
            }
            async fn document_names(&mut self, id: uuid::Uuid) -> Result<Vec<String>, StoreError> {
                self.0.document_names(id).await
            }
            async fn insert_document(&mut self, d: &Document) -> Result<(), StoreError> {
                self.0.insert_document(d).await
            }
            async fn upsert_lead(&mut self, l: &Lead) -> Result<UpsertOutcome, StoreError> {
                self.0.upsert_lead(l).await
            }
            async fn insert_reference(&mut self, r: &ReferenceRecord) -> Result<(), StoreError> {
                self.0.insert_reference(r).await
            }
            async fn record_failure(&mut self, f: &FailureRecord) -> Result<(), StoreError> {
                self.0.record_failure(f).await
            }
            async fn begin_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
                self.0.begin_run(run).await
            }
            async fn finish_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
                self.0.finish_run(run).await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write_leads(dir.path());
        let mut store = Disconnecting(MemoryStagingStore::new());

        let err = run_ingest(&mut store, &options(dir.path())).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(store.0.runs[0].status, RunStatus::Failed);
        assert!(store.0.leads.is_empty());
    }
}

#[cfg(test)]
mod migration_tests {
    use super::*;

    async fn staged() -> MemoryStagingStore {
        let dir = tempfile::tempdir().unwrap();
        build_source_tree(dir.path());
        let mut store = MemoryStagingStore::new();
        run_ingest(&mut store, &options(dir.path())).await.unwrap();
        store
    }

    #[tokio::test]
    async fn staging_is_promoted_once() {
        let mut staging = staged().await;
        let mut production = MemoryProductionStore::default();

        let first = run_migration(&mut staging, &mut production, false).await.unwrap();
        assert_eq!(first.students_created, 3);
        assert_eq!(first.leads_created, 10);
        // Ana's lead resolves to her student's person.
        assert_eq!(first.persons_created, 12);
        assert_eq!(first.failures, 0);

        let second = run_migration(&mut staging, &mut production, false).await.unwrap();
        assert_eq!(second.creates(), 0);
        assert_eq!(second.updates(), 0);
        assert_eq!(production.persons.len(), 12);
        assert_eq!(production.leads.len(), 10);
    }

    #[tokio::test]
    async fn converted_leads_point_at_their_student() {
        let mut staging = staged().await;
        let mut production = MemoryProductionStore::default();
        run_migration(&mut staging, &mut production, false).await.unwrap();

        let ana = production
            .persons
            .iter()
            .find(|p| p.normalized_name == "ANA GOMEZ")
            .unwrap();
        let student = production.students.iter().find(|s| s.person_id == ana.id).unwrap();
        let lead = production.leads.iter().find(|l| l.person_id == ana.id).unwrap();
        assert_eq!(lead.student_id, Some(student.id));

        let mut others = production.leads.iter().filter(|l| l.person_id != ana.id);
        assert!(others.all(|l| l.student_id.is_none()));
    }

    #[tokio::test]
    async fn dry_run_matches_the_real_decisions() {
        let mut staging = staged().await;
        let mut dry_target = MemoryProductionStore::default();
        let dry = run_migration(&mut staging, &mut dry_target, true).await.unwrap();
        assert!(dry_target.persons.is_empty());
        assert!(dry_target.students.is_empty());

        let mut target = MemoryProductionStore::default();
        let real = run_migration(&mut staging, &mut target, false).await.unwrap();
        assert_eq!(dry.creates(), real.creates());
        assert_eq!(dry.updates(), real.updates());
    }
}
