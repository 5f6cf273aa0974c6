//! Error types for regask-core.

use thiserror::Error;

use regask_db::DbError;

/// Result type alias for pipeline operations.
pub type RegaskResult<T> = Result<T, RegaskError>;

/// Domain-specific errors for the question pipeline.
///
/// Only failures that abort a request surface as `RegaskError`; the pipeline
/// converts most stage failures into well-formed degraded answers instead.
/// See the variant docs for which is which.
#[derive(Error, Debug)]
pub enum RegaskError {
    /// The schema catalog is inconsistent with the storage layer.
    ///
    /// Fatal at startup: a pipeline that cannot trust its catalog must not
    /// serve questions.
    #[error("Schema catalog invalid: {message}")]
    Schema {
        /// What is inconsistent.
        message: String,
    },

    /// The catalog has no entity with the given name.
    #[error("Unknown entity `{0}`")]
    UnknownEntity(String),

    /// A retrieval index is unavailable.
    ///
    /// The pipeline degrades (remaining methods still run); this error only
    /// escapes when every retrieval method is unavailable.
    #[error("Retrieval unavailable: {reason}")]
    RetrievalUnavailable {
        /// Which index is missing and why.
        reason: String,
    },

    /// A composed plan failed validation against the schema catalog.
    ///
    /// Surfaced to the user as a clarification answer, never executed.
    #[error("Plan validation failed: {message}. {hint}")]
    PlanValidation {
        /// What the plan got wrong.
        message: String,
        /// Actionable hint on how to rephrase.
        hint: String,
    },

    /// Query execution failed or timed out.
    ///
    /// Carries only the entity and predicate shape; raw store errors stay in
    /// the logs.
    #[error("Query execution failed for `{entity}` ({predicates})")]
    Execution {
        /// Target entity of the failed plan.
        entity: String,
        /// Predicate summary: field names and operators only, no values.
        predicates: String,
    },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// A caller-supplied argument is invalid (e.g., an empty question).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage-layer error that is not an index-missing condition.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse error wrapper.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RegaskError {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a retrieval-unavailable error.
    pub fn retrieval_unavailable(reason: impl Into<String>) -> Self {
        Self::RetrievalUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a plan-validation error.
    pub fn plan_validation(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::PlanValidation {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_configuration(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            hint: hint.into(),
        }
    }
}
