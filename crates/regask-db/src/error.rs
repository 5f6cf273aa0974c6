//! Error types for regask-db.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for regask-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in regask-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Relational store errors
    // ========================================================================
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The lexical (FTS5) index has not been built for this database.
    #[error("Lexical index not available: {reason}")]
    LexicalIndexMissing { reason: String },

    /// A plan request referenced a table the store does not expose.
    #[error("Unknown table in plan request: {table}")]
    UnknownTable { table: String },

    /// A plan request referenced a column outside the table's allowlist.
    #[error("Column `{column}` is not allowed for table `{table}`")]
    ColumnNotAllowed { table: String, column: String },

    /// A plan request carried no predicates or an invalid limit.
    #[error("Invalid plan request: {message}")]
    InvalidRequest { message: String },

    /// The per-query deadline elapsed while reading rows.
    #[error("Query deadline exceeded after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    // ========================================================================
    // Vector index errors
    // ========================================================================
    /// Vector index I/O error.
    #[error("Vector index I/O error at {path}: {message}")]
    VectorIo { path: PathBuf, message: String },

    /// Vector index parse error.
    #[error("Vector index parse error at {path}: {message}")]
    VectorParse { path: PathBuf, message: String },

    /// Vector dimension mismatch.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector index file not found.
    #[error("Vector index not found at {path}")]
    IndexNotFound { path: PathBuf },

    // ========================================================================
    // General errors
    // ========================================================================
    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a lexical-index-missing error.
    pub fn lexical_index_missing(reason: impl Into<String>) -> Self {
        Self::LexicalIndexMissing {
            reason: reason.into(),
        }
    }

    /// Create an unknown-table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Create a column-not-allowed error.
    pub fn column_not_allowed(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotAllowed {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a vector I/O error.
    pub fn vector_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VectorIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a vector parse error.
    pub fn vector_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VectorParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means an index is absent rather than a query failure.
    ///
    /// Callers use this to distinguish "degraded service" from "store broke".
    pub fn is_index_missing(&self) -> bool {
        matches!(
            self,
            Self::LexicalIndexMissing { .. } | Self::IndexNotFound { .. }
        )
    }
}
