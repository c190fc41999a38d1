//! Spreadsheet and document-folder ingestion engine.
//!
//! This library reads workbook/CSV exports and per-person document folders,
//! normalizes and deduplicates the people they describe, persists them into
//! a staging store, and later promotes staging into production.
//!
//! # Modules
//!
//! - `core`: Domain logic (classification, identity resolution, enrichment, migration).
//! - `data`: Input readers and persistence.
//! - `obs`: Tracing setup.
//! - `classifier`: Table classification and program inference.
//! - `columns`: Canonical fields and header resolution.
//! - `config`: Configuration management.
//! - `dates`: Spreadsheet date parsing.
//! - `db`: Database connection and schema management.
//! - `db_storage`: Postgres staging and production stores.
//! - `documents`: Document folder indexing.
//! - `enricher`: Directory/spreadsheet join.
//! - `errors`: Error handling types.
//! - `extractor`: Workbook and CSV extraction.
//! - `identity`: Priority-tiered identity index.
//! - `memory_store`: In-memory stores.
//! - `migrator`: Staging to production reconciliation.
//! - `models`: Core data models.
//! - `normalize`: Field normalizers.
//! - `pipeline`: Ingest orchestration.
//! - `records`: Row to record conversion.
//! - `sanitizer`: Person folder filtering.
//! - `staging`: Staging writer.

pub mod core;
pub mod data;
pub mod obs;

pub mod classifier;
pub mod columns;
pub mod config;
pub mod dates;
pub mod db;
pub mod db_storage;
pub mod documents;
pub mod enricher;
pub mod errors;
pub mod extractor;
pub mod identity;
pub mod memory_store;
pub mod migrator;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod sanitizer;
pub mod staging;
