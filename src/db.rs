use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        // Fail fast when the server is unreachable
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}

/// Staging tables, in dependency order.
pub const STAGING_TABLES: &[&str] = &[
    "staging_person",
    "staging_student",
    "staging_document",
    "staging_lead",
    "staging_reference_record",
    "staging_ingestion_run",
    "staging_failure_record",
];

const STAGING_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS staging_person (
        id UUID PRIMARY KEY,
        full_name TEXT NOT NULL CHECK (full_name <> ''),
        normalized_name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        national_id TEXT UNIQUE,
        birth_date DATE,
        country TEXT,
        city TEXT,
        source_file TEXT,
        source_sheet TEXT,
        enrichment_flag BOOLEAN NOT NULL DEFAULT false,
        data_source TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_staging_person_name ON staging_person (normalized_name)",
    r#"
    CREATE TABLE IF NOT EXISTS staging_student (
        id UUID PRIMARY KEY,
        person_id UUID NOT NULL UNIQUE REFERENCES staging_person (id),
        program TEXT NOT NULL,
        status TEXT NOT NULL,
        source_path TEXT,
        enrichment_flag BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_document (
        id UUID PRIMARY KEY,
        student_id UUID NOT NULL REFERENCES staging_student (id),
        original_name TEXT NOT NULL,
        file_name TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        mime_type TEXT NOT NULL,
        document_type TEXT NOT NULL,
        checksum TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (student_id, checksum)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_staging_document_name
        ON staging_document (student_id, file_name)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_lead (
        id UUID PRIMARY KEY,
        full_name TEXT NOT NULL CHECK (full_name <> ''),
        normalized_name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        national_id TEXT,
        birth_date DATE,
        country TEXT,
        city TEXT,
        program_type TEXT,
        interest_level TEXT,
        status TEXT NOT NULL,
        notes TEXT,
        source_file TEXT NOT NULL,
        source_sheet TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_staging_lead_email
        ON staging_lead (email) WHERE email IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_staging_lead_name_phone
        ON staging_lead (normalized_name, phone) WHERE email IS NULL AND phone IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_staging_lead_name_source
        ON staging_lead (normalized_name, source_file, source_sheet) WHERE email IS NULL AND phone IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_reference_record (
        id UUID PRIMARY KEY,
        source_file TEXT NOT NULL,
        source_sheet TEXT NOT NULL,
        data_type TEXT NOT NULL,
        category TEXT NOT NULL,
        payload JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_ingestion_run (
        id UUID PRIMARY KEY,
        source_path TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ,
        status TEXT NOT NULL,
        counts JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_failure_record (
        id UUID PRIMARY KEY,
        run_id UUID REFERENCES staging_ingestion_run (id),
        payload JSONB NOT NULL,
        error_message TEXT NOT NULL,
        error_type TEXT NOT NULL,
        source_file TEXT,
        source_sheet TEXT,
        attempted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        resolved BOOLEAN NOT NULL DEFAULT false
    )
    "#,
];

const PRODUCTION_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS persons (
        id UUID PRIMARY KEY,
        full_name TEXT NOT NULL CHECK (full_name <> ''),
        normalized_name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        national_id TEXT UNIQUE,
        birth_date DATE,
        country TEXT,
        city TEXT,
        source_file TEXT,
        source_sheet TEXT,
        enrichment_flag BOOLEAN NOT NULL DEFAULT false,
        data_source TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_persons_name ON persons (normalized_name)",
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id UUID PRIMARY KEY,
        person_id UUID NOT NULL UNIQUE REFERENCES persons (id),
        program TEXT NOT NULL,
        status TEXT NOT NULL,
        source_path TEXT,
        enrichment_flag BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY,
        person_id UUID NOT NULL REFERENCES persons (id),
        student_id UUID REFERENCES students (id),
        program_type TEXT,
        interest_level TEXT,
        status TEXT NOT NULL,
        source_file TEXT NOT NULL,
        source_sheet TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_leads_person_program_source
        ON leads (person_id, COALESCE(program_type, ''), source_file)
    "#,
];

async fn run_ddl(pool: &PgPool, statements: &[&str]) -> Result<(), sqlx::Error> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn ensure_staging_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    run_ddl(pool, STAGING_SCHEMA).await?;
    tracing::debug!("Staging schema ready");
    Ok(())
}

pub async fn ensure_production_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    run_ddl(pool, PRODUCTION_SCHEMA).await?;
    tracing::debug!("Production schema ready");
    Ok(())
}

/// Prepares production for a migration. A dry run never issues DDL against it.
///
/// Returns whether the schema statements were run.
pub async fn prepare_production_schema(pool: &PgPool, dry_run: bool) -> Result<bool, sqlx::Error> {
    if dry_run {
        tracing::info!("Dry run: production schema is not modified");
        return Ok(false);
    }
    ensure_production_schema(pool).await?;
    Ok(true)
}

/// Empties every staging table. Administrative only.
pub async fn reset_staging(pool: &PgPool) -> Result<(), sqlx::Error> {
    let statement = format!("TRUNCATE {} CASCADE", STAGING_TABLES.join(", "));
    sqlx::query(&statement).execute(pool).await?;
    tracing::warn!("Staging tables truncated");
    Ok(())
}

/// Row count per staging table.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(&'static str, i64)>, sqlx::Error> {
    let mut counts = Vec::with_capacity(STAGING_TABLES.len());
    for table in STAGING_TABLES {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        counts.push((*table, count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_leaves_production_untouched() {
        // Never connects: any statement against this pool would fail.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/production")
            .unwrap();
        assert!(!prepare_production_schema(&pool, true).await.unwrap());
    }

    #[test]
    fn lead_indexes_cover_every_identifier_shape() {
        let ddl = STAGING_SCHEMA.join("\n");
        assert!(ddl.contains("WHERE email IS NOT NULL"));
        assert!(ddl.contains("WHERE email IS NULL AND phone IS NOT NULL"));
        assert!(ddl.contains("WHERE email IS NULL AND phone IS NULL"));
        assert!(ddl.contains("ON staging_document (student_id, file_name)"));
    }
}
