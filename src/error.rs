use std::path::PathBuf;

use thiserror::Error;

use crate::eval::Stage;

/// Errors raised while loading inputs or running an evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{operation}() called in state {actual:?}, expected {expected:?}")]
    Sequencing {
        operation: &'static str,
        expected: Stage,
        actual: Stage,
    },

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("failed to write report: {0}")]
    Report(#[source] std::io::Error),
}

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
