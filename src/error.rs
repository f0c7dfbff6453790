use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid keyword pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid download status: {0}")]
    InvalidStatus(String),

    #[error("invalid download url: {0}")]
    InvalidUrl(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("failed to decode catalog metadata: {0}")]
    CatalogParse(String),

    #[error("CSV request failed: {0}")]
    CsvHttp(String),

    #[error("CSV source returned status {status}: {message}")]
    CsvStatus { status: u16, message: String },

    #[error("failed to transform CSV: {0}")]
    Csv(String),

    #[error("control store error: {0}")]
    Control(String),

    #[error("control row already exists for {id} at {last_modified}")]
    DuplicateControlRow { id: String, last_modified: String },

    #[error("no control row for {id} at {last_modified}")]
    MissingControlRow { id: String, last_modified: String },

    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Control(err.to_string())
    }
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        SyncError::Csv(err.to_string())
    }
}
