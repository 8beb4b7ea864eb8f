//! # Publisher Errors
//!
//! Structured error handling for the publishing core.
//!
//! Every variant carries a stable string code (see [`PublisherError::code`]) so that
//! callers and job logs can classify failures without matching on message text:
//!
//! - lookup failures (`LIST_MISSING`, `EDITION_MISSING`, `EXTENSION_MISSING`, ...) are
//!   reported and never retried
//! - extension malfunctions (`GENERATOR_MALFUNCTION`, `FILTER_MALFUNCTION`,
//!   `EXPANDER_MALFUNCTION`) fail the affected content list run
//! - repository and database errors surface as generic repository errors and abort a
//!   job when they happen mid-run

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublisherError {
    #[error("Content list not found: {0}")]
    ListMissing(String),
    #[error("Edition not found: {0}")]
    EditionMissing(String),
    #[error("Publishing job {0} not found")]
    JobMissing(i64),
    #[error("No {kind} extension registered under '{name}'")]
    ExtensionMissing { kind: String, name: String },
    #[error("Generator '{generator}' failed: {reason}")]
    GeneratorMalfunction { generator: String, reason: String },
    #[error("Item filter '{filter}' failed: {reason}")]
    FilterMalfunction { filter: String, reason: String },
    #[error("Template expander '{expander}' failed: {reason}")]
    ExpanderMalfunction { expander: String, reason: String },
    #[error("Legacy query '{url}' failed: {reason}")]
    LegacyQueryFailed { url: String, reason: String },
    #[error("A {entity} named '{name}' already exists")]
    DuplicateName { entity: String, name: String },
    #[error("Publishing job {0} already exists")]
    DuplicateJob(i64),
    #[error("Invalid job state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
    #[error("Edition {edition_id} already has an active job {job_id}")]
    AlreadyRunning { edition_id: i64, job_id: i64 },
    #[error("Repository error: {0}")]
    Repository(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PublisherError {
    /// Stable classification code for logs and callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::ListMissing(_) => "LIST_MISSING",
            Self::EditionMissing(_) => "EDITION_MISSING",
            Self::JobMissing(_) => "JOB_MISSING",
            Self::ExtensionMissing { .. } => "EXTENSION_MISSING",
            Self::GeneratorMalfunction { .. } => "GENERATOR_MALFUNCTION",
            Self::FilterMalfunction { .. } => "FILTER_MALFUNCTION",
            Self::ExpanderMalfunction { .. } => "EXPANDER_MALFUNCTION",
            Self::LegacyQueryFailed { .. } => "LEGACY_QUERY_FAILED",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::DuplicateJob(_) => "DUPLICATE_JOB",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// Lookup failures are reported, not retried; only storage errors may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::Database(_))
    }

    /// Errors raised while invoking a name-addressed extension
    pub fn is_extension_failure(&self) -> bool {
        matches!(
            self,
            Self::ExtensionMissing { .. }
                | Self::GeneratorMalfunction { .. }
                | Self::FilterMalfunction { .. }
                | Self::ExpanderMalfunction { .. }
                | Self::LegacyQueryFailed { .. }
        )
    }

    pub fn extension_missing(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ExtensionMissing {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn duplicate_name(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            entity: entity.into(),
            name: name.into(),
        }
    }
}

impl From<serde_json::Error> for PublisherError {
    fn from(error: serde_json::Error) -> Self {
        PublisherError::Validation(format!("JSON serialization error: {error}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PublisherError {
    fn from(err: sqlx::Error) -> Self {
        PublisherError::Database(err.to_string())
    }
}

impl From<config::ConfigError> for PublisherError {
    fn from(err: config::ConfigError) -> Self {
        PublisherError::Configuration(err.to_string())
    }
}

pub type PublisherResult<T> = std::result::Result<T, PublisherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            PublisherError::ListMissing("news".to_string()).code(),
            "LIST_MISSING"
        );
        assert_eq!(
            PublisherError::FilterMalfunction {
                filter: "public".to_string(),
                reason: "boom".to_string(),
            }
            .code(),
            "FILTER_MALFUNCTION"
        );
        assert_eq!(PublisherError::DuplicateJob(7).code(), "DUPLICATE_JOB");
    }

    #[test]
    fn test_lookup_failures_are_not_retryable() {
        assert!(!PublisherError::ListMissing("x".to_string()).is_retryable());
        assert!(!PublisherError::extension_missing("generator", "x").is_retryable());
        assert!(PublisherError::Database("connection reset".to_string()).is_retryable());
    }

    #[test]
    fn test_extension_failure_classification() {
        assert!(PublisherError::extension_missing("expander", "by_type").is_extension_failure());
        assert!(!PublisherError::JobMissing(3).is_extension_failure());
    }
}
