//! # nlgis - Natural-language spatial SQL
//!
//! Turns questions about a geospatial dataset into spatial SQL that only uses the
//! layer names and attribute keys actually present in the store.
//!
//! nlgis provides:
//! - Shapefile ingestion into a single SQLite-backed spatial table (SRID 4326)
//! - Schema grounding context discovered from the live layer contents
//! - Grounded query generation behind a narrow structured-generation trait
//! - Verbatim query execution with an explicit caller-supplied gate

pub mod config;
pub mod context;
pub mod ingest;
pub mod query;
pub mod storage;
pub mod ui;

// Re-exports for convenient access
pub use context::{SchemaContext, SchemaContextEntry, SchemaContextGenerator};
pub use ingest::{IngestSummary, LayerReport, ShapefileIngestor};
pub use query::{GeneratedQuery, QueryEngine, QueryExecutor, QueryGenerator, StructuredGenerator};
pub use storage::SqliteStore;

/// The only spatial reference system the store holds.
pub const SRID: i32 = 4326;

/// Result type alias for nlgis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for nlgis operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Layer '{layer}' is missing companion file {path}")]
    MissingCompanion { layer: String, path: String },

    #[error("Layer '{layer}': unreadable shapefile data: {message}")]
    Shapefile { layer: String, message: String },

    #[error("Layer '{layer}': {shapes} shapes but {records} attribute records")]
    Combine {
        layer: String,
        shapes: usize,
        records: usize,
    },

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Config error: {0}")]
    Config(String),

    /// Deliberately carries no provider detail; the cause is logged where it happens.
    #[error("query generation failed")]
    QueryGeneration,

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Query rejected: {0}")]
    Rejected(String),
}
