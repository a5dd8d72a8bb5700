//! Canonical error set carried across every Lattice component.

use thiserror::Error;

/// Result type alias for Lattice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the engine.
///
/// Component functions raise exactly one of these kinds; the search
/// orchestrator degrades instead of raising where partial results are still
/// useful, and the migrator treats [`Error::IncompatibleValue`] as per-row
/// data rather than control flow.
#[derive(Debug, Error)]
pub enum Error {
    /// Target id absent, or tombstoned when the operation requires an active row
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-index violation: active canonical id, or (project, type, key) collision
    #[error("conflict: {0}")]
    Conflict(String),

    /// Property payload or relationship endpoints violate the registered schema
    #[error("validation failed at '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// Malformed arguments: query too long, unknown strategy, invalid UUID, ...
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Caller is not authenticated (auth itself is an external concern)
    #[error("unauthorized")]
    Unauthorized,

    /// Caller is authenticated but not allowed to invoke this operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transient storage or embedding failure; the caller may retry
    #[error("transient i/o failure: {0}")]
    RetryableIo(String),

    /// Embedding provider down or over quota; create paths soft-fail on this
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The gate refused a risky/dangerous migration without the required flags
    #[error("migration blocked: {0}")]
    MigrationBlocked(String),

    /// Per-row migration value that cannot be coerced; accumulated, not raised
    #[error("incompatible value at '{field}': {reason}")]
    IncompatibleValue { field: String, reason: String },

    /// Non-retryable database fault
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Error::Conflict(what.into())
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_request(what: impl Into<String>) -> Self {
        Error::BadRequest(what.into())
    }

    pub fn incompatible(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::IncompatibleValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used by the tool surface when mapping
    /// failures into agent-visible envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Validation { .. } => "validation_error",
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::RetryableIo(_) => "retryable_io",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::MigrationBlocked(_) => "migration_blocked",
            Error::IncompatibleValue { .. } => "incompatible_value",
            Error::Storage(_) => "storage_error",
        }
    }

    /// Whether a caller may reasonably retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RetryableIo(_) | Error::EmbeddingUnavailable(_) | Error::Conflict(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::not_found("object abc").code(), "not_found");
        assert_eq!(
            Error::validation("properties.email", "required").code(),
            "validation_error"
        );
        assert_eq!(Error::MigrationBlocked("risky".into()).code(), "migration_blocked");
    }

    #[test]
    fn validation_error_preserves_field_path() {
        let err = Error::validation("properties.age", "expected number, got string");
        assert_eq!(
            err.to_string(),
            "validation failed at 'properties.age': expected number, got string"
        );
    }

    #[test]
    fn conflict_is_retryable_but_validation_is_not() {
        assert!(Error::conflict("active version changed").is_retryable());
        assert!(Error::RetryableIo("pool exhausted".into()).is_retryable());
        assert!(!Error::validation("f", "r").is_retryable());
        assert!(!Error::bad_request("query too long").is_retryable());
    }
}
