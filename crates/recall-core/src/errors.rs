//! Error types for the Recall core library.

use std::path::PathBuf;

/// Top-level error enum for the Recall core library.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("Invalid scope: {path} lies outside workspace root {}", .root.display())]
    InvalidScope { path: String, root: PathBuf },

    #[error("Malformed cache entry: {0}")]
    MalformedCacheEntry(String),

    #[error("Retrieval returned no candidates")]
    NoCandidates,

    #[error("Index bootstrap required: {reason}")]
    BootstrapRequired { reason: String },

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Manifest error in {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob error: {0}")]
    Glob(#[from] globset::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RecallError {
    /// True when the error rejects the query itself rather than a collaborator.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, RecallError::InvalidScope { .. } | RecallError::Config(_))
    }
}

#[cfg(feature = "python")]
impl From<RecallError> for pyo3::PyErr {
    fn from(err: RecallError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
        match &err {
            RecallError::InvalidScope { .. }
            | RecallError::Config(_)
            | RecallError::Json(_)
            | RecallError::Toml(_)
            | RecallError::Glob(_)
            | RecallError::Manifest { .. }
            | RecallError::MalformedCacheEntry(_) => PyValueError::new_err(err.to_string()),
            RecallError::Io(_) => PyIOError::new_err(err.to_string()),
            RecallError::NoCandidates
            | RecallError::BootstrapRequired { .. }
            | RecallError::Bootstrap(_)
            | RecallError::Retrieval(_)
            | RecallError::Sqlite(_) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

pub type RecallResult<T> = Result<T, RecallError>;
