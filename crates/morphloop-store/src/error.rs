use morphloop_core::{FileId, ParseEnumError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        Self::Corrupt(err.to_string())
    }
}
