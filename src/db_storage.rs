//! Postgres implementations of the staging and production stores.
//!
//! Every row write runs as its own statement or transaction, so one failing
//! row never rolls back another. sqlx errors are mapped to [`StoreError`]
//! here, which is where the failure taxonomy is decided.

use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::classifier::UNKNOWN_PROGRAM;
use crate::errors::StoreError;
use crate::migrator::{ProductionStore, StagingSource};
use crate::models::{
    Document, FailureRecord, IngestionRun, Lead, Person, ProductionLead, ReferenceRecord, Student,
};
use crate::staging::{StagingStore, UpsertOutcome, Write};

const PERSON_COLUMNS: &str = "id, full_name, normalized_name, email, phone, address, national_id, \
     birth_date, country, city, source_file, source_sheet, enrichment_flag, data_source, created_at";

const STUDENT_COLUMNS: &str = "id, person_id, program, status, source_path, enrichment_flag, created_at";

const LEAD_COLUMNS: &str = "id, full_name, normalized_name, email, phone, address, national_id, \
     birth_date, country, city, program_type, interest_level, status, notes, source_file, \
     source_sheet, created_at, updated_at";

/// Table names for one side of the pipeline.
struct Tables {
    person: &'static str,
    student: &'static str,
}

const STAGING: Tables = Tables {
    person: "staging_person",
    student: "staging_student",
};

const PRODUCTION: Tables = Tables {
    person: "persons",
    student: "students",
};

async fn load_persons(pool: &PgPool, tables: &Tables) -> Result<Vec<Person>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} ORDER BY created_at, id",
        PERSON_COLUMNS, tables.person
    );
    Ok(sqlx::query_as::<_, Person>(&sql).fetch_all(pool).await?)
}

async fn load_students(pool: &PgPool, tables: &Tables) -> Result<Vec<Student>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} ORDER BY created_at, id",
        STUDENT_COLUMNS, tables.student
    );
    Ok(sqlx::query_as::<_, Student>(&sql).fetch_all(pool).await?)
}

/// Inserts or null-fills a person. Populated columns are never overwritten.
async fn write_person(conn: &mut PgConnection, tables: &Tables, write: &Write<Person>) -> Result<(), sqlx::Error> {
    match write {
        Write::Insert(p) => {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                tables.person, PERSON_COLUMNS
            );
            sqlx::query(&sql)
                .bind(p.id)
                .bind(&p.full_name)
                .bind(&p.normalized_name)
                .bind(&p.email)
                .bind(&p.phone)
                .bind(&p.address)
                .bind(&p.national_id)
                .bind(p.birth_date)
                .bind(&p.country)
                .bind(&p.city)
                .bind(&p.source_file)
                .bind(&p.source_sheet)
                .bind(p.enrichment_flag)
                .bind(p.data_source.as_str())
                .bind(p.created_at)
                .execute(&mut *conn)
                .await?;
        }
        Write::Update(p) => {
            let sql = format!(
                r#"
                UPDATE {}
                SET email = COALESCE(email, $2),
                    phone = COALESCE(phone, $3),
                    address = COALESCE(address, $4),
                    national_id = COALESCE(national_id, $5),
                    birth_date = COALESCE(birth_date, $6),
                    country = COALESCE(country, $7),
                    city = COALESCE(city, $8),
                    enrichment_flag = enrichment_flag OR $9,
                    data_source = $10
                WHERE id = $1
                "#,
                tables.person
            );
            sqlx::query(&sql)
                .bind(p.id)
                .bind(&p.email)
                .bind(&p.phone)
                .bind(&p.address)
                .bind(&p.national_id)
                .bind(p.birth_date)
                .bind(&p.country)
                .bind(&p.city)
                .bind(p.enrichment_flag)
                .bind(p.data_source.as_str())
                .execute(&mut *conn)
                .await?;
        }
        Write::Keep => {}
    }
    Ok(())
}

async fn write_student_row(conn: &mut PgConnection, tables: &Tables, write: &Write<Student>) -> Result<(), sqlx::Error> {
    match write {
        Write::Insert(s) => {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                tables.student, STUDENT_COLUMNS
            );
            sqlx::query(&sql)
                .bind(s.id)
                .bind(s.person_id)
                .bind(&s.program)
                .bind(s.status.as_str())
                .bind(&s.source_path)
                .bind(s.enrichment_flag)
                .bind(s.created_at)
                .execute(&mut *conn)
                .await?;
        }
        Write::Update(s) => {
            let sql = format!(
                r#"
                UPDATE {}
                SET program = CASE WHEN program = $5 THEN $2 ELSE program END,
                    source_path = COALESCE(source_path, $3),
                    enrichment_flag = enrichment_flag OR $4
                WHERE id = $1
                "#,
                tables.student
            );
            sqlx::query(&sql)
                .bind(s.id)
                .bind(&s.program)
                .bind(&s.source_path)
                .bind(s.enrichment_flag)
                .bind(UNKNOWN_PROGRAM)
                .execute(&mut *conn)
                .await?;
        }
        Write::Keep => {}
    }
    Ok(())
}

async fn write_student_tx(
    pool: &PgPool,
    tables: &Tables,
    person: &Write<Person>,
    student: &Write<Student>,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    write_person(&mut tx, tables, person).await?;
    write_student_row(&mut tx, tables, student).await?;
    tx.commit().await?;
    Ok(())
}

/// Staging store over a Postgres pool.
pub struct PgStagingStore {
    pool: PgPool,
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conflict target matching the partial unique index the lead falls under.
    fn lead_conflict_target(lead: &Lead) -> &'static str {
        match (&lead.email, &lead.phone) {
            (Some(_), _) => "(email) WHERE email IS NOT NULL",
            (None, Some(_)) => "(normalized_name, phone) WHERE email IS NULL AND phone IS NOT NULL",
            (None, None) => {
                "(normalized_name, source_file, source_sheet) WHERE email IS NULL AND phone IS NULL"
            }
        }
    }
}

impl StagingStore for PgStagingStore {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
        load_persons(&self.pool, &STAGING).await
    }

    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
        load_students(&self.pool, &STAGING).await
    }

    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError> {
        write_student_tx(&self.pool, &STAGING, person, student).await
    }

    async fn document_exists(&mut self, student_id: Uuid, checksum: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM staging_document WHERE student_id = $1 AND checksum = $2)",
        )
        .bind(student_id)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn document_names(&mut self, student_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT file_name FROM staging_document WHERE student_id = $1")
                .bind(student_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO staging_document (
                id, student_id, original_name, file_name, storage_path, size_bytes,
                mime_type, document_type, checksum, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(document.id)
        .bind(document.student_id)
        .bind(&document.original_name)
        .bind(&document.file_name)
        .bind(&document.storage_path)
        .bind(document.size_bytes)
        .bind(&document.mime_type)
        .bind(document.document_type.as_str())
        .bind(&document.checksum)
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_lead(&mut self, lead: &Lead) -> Result<UpsertOutcome, StoreError> {
        // No row back means the conflict update was skipped: nothing changed.
        let sql = format!(
            r#"
            INSERT INTO staging_lead ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT {} DO UPDATE
            SET status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                updated_at = now()
            WHERE staging_lead.status IS DISTINCT FROM EXCLUDED.status
               OR staging_lead.notes IS DISTINCT FROM EXCLUDED.notes
            RETURNING (xmax = 0) AS inserted
            "#,
            LEAD_COLUMNS,
            Self::lead_conflict_target(lead)
        );
        let inserted: Option<bool> = sqlx::query_scalar(&sql)
            .bind(lead.id)
            .bind(&lead.full_name)
            .bind(&lead.normalized_name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.address)
            .bind(&lead.national_id)
            .bind(lead.birth_date)
            .bind(&lead.country)
            .bind(&lead.city)
            .bind(&lead.program_type)
            .bind(&lead.interest_level)
            .bind(lead.status.as_str())
            .bind(&lead.notes)
            .bind(&lead.source_file)
            .bind(&lead.source_sheet)
            .bind(lead.created_at)
            .bind(lead.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }

    async fn insert_reference(&mut self, record: &ReferenceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO staging_reference_record (
                id, source_file, source_sheet, data_type, category, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.source_file)
        .bind(&record.source_sheet)
        .bind(record.data_type.as_str())
        .bind(&record.category)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&mut self, failure: &FailureRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO staging_failure_record (
                id, run_id, payload, error_message, error_type, source_file, source_sheet,
                attempted_at, resolved
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(failure.id)
        .bind(failure.run_id)
        .bind(&failure.payload)
        .bind(&failure.error_message)
        .bind(failure.error_type.as_str())
        .bind(&failure.source_file)
        .bind(&failure.source_sheet)
        .bind(failure.attempted_at)
        .bind(failure.resolved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO staging_ingestion_run (id, source_path, started_at, completed_at, status, counts)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id)
        .bind(&run.source_path)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.status.as_str())
        .bind(&run.counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE staging_ingestion_run
            SET completed_at = $2, status = $3, counts = $4
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.completed_at)
        .bind(run.status.as_str())
        .bind(&run.counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl StagingSource for PgStagingStore {
    async fn staged_students(&mut self) -> Result<Vec<(Person, Student)>, StoreError> {
        let mut persons: HashMap<Uuid, Person> = load_persons(&self.pool, &STAGING)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let students = load_students(&self.pool, &STAGING).await?;

        Ok(students
            .into_iter()
            .filter_map(|s| persons.remove(&s.person_id).map(|p| (p, s)))
            .collect())
    }

    async fn staged_leads(&mut self) -> Result<Vec<Lead>, StoreError> {
        let sql = format!(
            "SELECT {} FROM staging_lead ORDER BY created_at, id",
            LEAD_COLUMNS
        );
        Ok(sqlx::query_as::<_, Lead>(&sql).fetch_all(&self.pool).await?)
    }
}

/// Production store over a Postgres pool.
pub struct PgProductionStore {
    pool: PgPool,
}

impl PgProductionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn write_lead_row(conn: &mut PgConnection, write: &Write<ProductionLead>) -> Result<(), sqlx::Error> {
    match write {
        Write::Insert(l) => {
            sqlx::query(
                r#"
                INSERT INTO leads (
                    id, person_id, student_id, program_type, interest_level, status,
                    source_file, source_sheet, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(l.id)
            .bind(l.person_id)
            .bind(l.student_id)
            .bind(&l.program_type)
            .bind(&l.interest_level)
            .bind(l.status.as_str())
            .bind(&l.source_file)
            .bind(&l.source_sheet)
            .bind(l.created_at)
            .bind(l.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::Update(l) => {
            sqlx::query(
                r#"
                UPDATE leads
                SET student_id = COALESCE(student_id, $2),
                    program_type = COALESCE(program_type, $3),
                    interest_level = COALESCE(interest_level, $4),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(l.id)
            .bind(l.student_id)
            .bind(&l.program_type)
            .bind(&l.interest_level)
            .execute(&mut *conn)
            .await?;
        }
        Write::Keep => {}
    }
    Ok(())
}

impl ProductionStore for PgProductionStore {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
        load_persons(&self.pool, &PRODUCTION).await
    }

    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
        load_students(&self.pool, &PRODUCTION).await
    }

    async fn load_leads(&mut self) -> Result<Vec<ProductionLead>, StoreError> {
        Ok(sqlx::query_as::<_, ProductionLead>(
            r#"
            SELECT id, person_id, student_id, program_type, interest_level, status,
                   source_file, source_sheet, created_at, updated_at
            FROM leads
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError> {
        write_student_tx(&self.pool, &PRODUCTION, person, student).await
    }

    async fn write_lead(&mut self, person: &Write<Person>, lead: &Write<ProductionLead>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_person(&mut tx, &PRODUCTION, person).await?;
        write_lead_row(&mut tx, lead).await?;
        tx.commit().await?;
        Ok(())
    }
}
