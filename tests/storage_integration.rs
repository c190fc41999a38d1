use std::env;
use uuid::Uuid;

use rust_ice_ingest::data::db_storage::{PgProductionStore, PgStagingStore};
use rust_ice_ingest::db::{self, Database};
use rust_ice_ingest::migrator::run_migration;
use rust_ice_ingest::models::{DataSource, Lead, LeadStatus, Person, Student, StudentStatus};
use rust_ice_ingest::staging::{StagingStore, UpsertOutcome, Write};

async fn connect(var: &str) -> anyhow::Result<Database> {
    let db_url = env::var(var)
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set {} or TEST_DATABASE_URL to run this test", var))?;
    Ok(Database::new(&db_url, 2).await?)
}

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, Uuid::new_v4().simple())
}

/// Staging smoke test against a real Postgres.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn staging_upserts_are_idempotent() -> anyhow::Result<()> {
    let db = connect("TEST_STAGING_DATABASE_URL").await?;
    db::ensure_staging_schema(&db.pool).await?;
    let mut store = PgStagingStore::new(db.pool.clone());

    let mut person = Person::new("Prueba Integracion", DataSource::Spreadsheet);
    person.email = Some(unique_email("staging"));
    let student = Student::new(person.id, "Au Pair", StudentStatus::Enrolled);
    store
        .write_student(&Write::Insert(person.clone()), &Write::Insert(student))
        .await?;

    // A second student for the same person violates the 1:1 ownership.
    let duplicate = Student::new(person.id, "Au Pair", StudentStatus::Enrolled);
    let err = store
        .write_student(&Write::Keep, &Write::Insert(duplicate))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), rust_ice_ingest::models::FailureKind::Duplicate);

    let mut lead = Lead::from_person(&person, LeadStatus::New);
    lead.source_file = "leads.xlsx".into();
    lead.source_sheet = "Hoja1".into();
    assert_eq!(store.upsert_lead(&lead).await?, UpsertOutcome::Inserted);
    assert_eq!(store.upsert_lead(&lead).await?, UpsertOutcome::Unchanged);

    lead.id = Uuid::new_v4();
    lead.status = LeadStatus::Contacted;
    assert_eq!(store.upsert_lead(&lead).await?, UpsertOutcome::Updated);

    Ok(())
}

/// Migration smoke test: staging and production can be the same database.
#[tokio::test]
#[ignore]
async fn migration_is_repeatable() -> anyhow::Result<()> {
    let staging = connect("TEST_STAGING_DATABASE_URL").await?;
    let production = connect("TEST_PRODUCTION_DATABASE_URL").await?;
    db::ensure_staging_schema(&staging.pool).await?;
    db::ensure_production_schema(&production.pool).await?;

    let mut source = PgStagingStore::new(staging.pool.clone());
    let mut target = PgProductionStore::new(production.pool.clone());

    run_migration(&mut source, &mut target, false).await?;
    let second = run_migration(&mut source, &mut target, false).await?;
    assert_eq!(second.creates(), 0);
    assert_eq!(second.updates(), 0);

    Ok(())
}
