use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use rust_ice_ingest::config::Config;
use rust_ice_ingest::db::{self, Database};
use rust_ice_ingest::db_storage::{PgProductionStore, PgStagingStore};
use rust_ice_ingest::errors::{AppError, ResultExt};
use rust_ice_ingest::memory_store::MemoryStagingStore;
use rust_ice_ingest::migrator::run_migration;
use rust_ice_ingest::obs::init_tracing;
use rust_ice_ingest::pipeline::{run_ingest, IngestOptions};
use rust_ice_ingest::staging::remove_staged_documents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Extract, resolve and write the source tree into staging.
    Ingest,
    /// Promote staging records into production.
    Migrate,
    /// Empty the staging tables (requires --confirm).
    Reset,
}

#[derive(Debug, Parser)]
#[command(name = "rust-ice-ingest", version, about = "Spreadsheet and document-folder ingestion")]
struct Cli {
    /// Root of the spreadsheets and document folders to ingest
    #[arg(long, env = "SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Ingest)]
    mode: Mode,

    /// Compute every decision without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Overrides STAGING_DATABASE_URL
    #[arg(long)]
    staging_db: Option<String>,

    /// Overrides PRODUCTION_DATABASE_URL
    #[arg(long)]
    production_db: Option<String>,

    /// Overrides STAGING_DIR
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Required by --mode reset
    #[arg(long)]
    confirm: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e.downcast_ref::<AppError>().map(AppError::exit_code).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?.with_overrides(
        cli.staging_db.clone(),
        cli.production_db.clone(),
        cli.staging_dir.clone(),
    )?;

    match cli.mode {
        Mode::Ingest => ingest(&cli, &config).await,
        Mode::Migrate => migrate(&cli, &config).await,
        Mode::Reset => reset(&cli, &config).await,
    }
}

async fn connect(url: &str, config: &Config, what: &str) -> Result<Database, AppError> {
    let db = Database::new(url, config.max_connections)
        .await
        .with_context(|| format!("Failed to connect to {} database", what))?;
    tracing::info!("Connected to {} database", what);
    Ok(db)
}

async fn ingest(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let source_dir = cli
        .source_dir
        .clone()
        .ok_or_else(|| AppError::BadRequest("--source-dir is required for ingest".into()))?;
    let options = IngestOptions {
        source_dir,
        staging_dir: config.staging_dir.clone(),
    };

    let report = if cli.dry_run {
        tracing::info!("Dry run: staging writes go to an in-memory store");
        let mut store = MemoryStagingStore::new();
        // Nothing is copied in a dry run.
        let options = IngestOptions {
            staging_dir: None,
            ..options
        };
        run_ingest(&mut store, &options).await?
    } else {
        let db = connect(config.require_staging_url()?, config, "staging").await?;
        db::ensure_staging_schema(&db.pool)
            .await
            .context("Failed to prepare staging schema")?;
        let mut store = PgStagingStore::new(db.pool.clone());
        run_ingest(&mut store, &options).await?
    };

    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    Ok(())
}

async fn migrate(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let staging = connect(config.require_staging_url()?, config, "staging").await?;
    let production = connect(config.require_production_url()?, config, "production").await?;
    db::ensure_staging_schema(&staging.pool)
        .await
        .context("Failed to prepare staging schema")?;
    db::prepare_production_schema(&production.pool, cli.dry_run)
        .await
        .context("Failed to prepare production schema")?;

    let mut source = PgStagingStore::new(staging.pool.clone());
    let mut target = PgProductionStore::new(production.pool.clone());
    let report = run_migration(&mut source, &mut target, cli.dry_run).await?;

    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    Ok(())
}

async fn reset(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    if !cli.confirm {
        return Err(AppError::BadRequest("reset truncates every staging table; pass --confirm".into()).into());
    }
    let db = connect(config.require_staging_url()?, config, "staging").await?;
    db::reset_staging(&db.pool)
        .await
        .context("Failed to reset staging")?;
    println!("Staging tables truncated");

    if let Some(dir) = &config.staging_dir {
        let removed = remove_staged_documents(dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove staged documents in {}: {}", dir.display(), e))?;
        if removed {
            println!("Staged documents removed from {}", dir.display());
        }
    }
    Ok(())
}
