use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeoparcelError {
    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("no project ids supplied")]
    EmptyProjectList,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("unknown pallet: {0}")]
    UnknownPallet(String),

    #[error("missing config file geoparcel.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("source table not found: {0}")]
    SourceTableNotFound(String),

    #[error("invalid geometry blob: {0}")]
    InvalidGeometry(String),

    #[error("cannot merge geometries: {0}")]
    GeometryMerge(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),
}
