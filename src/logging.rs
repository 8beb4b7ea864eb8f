//! # Structured Logging Module
//!
//! Installs the process-wide `tracing` subscriber and provides helpers that emit
//! uniform records for job, item and task operations. Every record carries the same
//! field names (`job_id`, `edition_id`, `reference_id`, ...) so that JSON output can
//! be filtered without parsing messages.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::PublisherError;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
///
/// `RUST_LOG` overrides `config.level` when set.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            "Structured logging initialized"
        );
    });
}

/// Log structured data for job-level operations
pub fn log_job_operation(
    operation: &str,
    job_id: i64,
    edition_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        edition_id = edition_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log structured data for item-level operations
pub fn log_item_operation(
    operation: &str,
    job_id: i64,
    reference_id: Option<i64>,
    content_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        job_id = job_id,
        reference_id = reference_id,
        content_id = content_id,
        status = %status,
        details = details,
        "ITEM_OPERATION"
    );
}

/// Log structured data for edition task executions
pub fn log_task_operation(
    job_id: i64,
    task_id: i64,
    extension_name: &str,
    success: bool,
    elapsed_ms: i64,
    message: Option<&str>,
) {
    if success {
        tracing::info!(
            job_id = job_id,
            task_id = task_id,
            extension = %extension_name,
            elapsed_ms = elapsed_ms,
            message = message,
            "TASK_OPERATION"
        );
    } else {
        tracing::warn!(
            job_id = job_id,
            task_id = task_id,
            extension = %extension_name,
            elapsed_ms = elapsed_ms,
            message = message,
            "TASK_OPERATION failed"
        );
    }
}

/// Log an error with its stable code and retry classification
pub fn log_error(component: &str, job_id: Option<i64>, error: &PublisherError) {
    tracing::error!(
        component = %component,
        job_id = job_id,
        error_code = error.code(),
        retryable = error.is_retryable(),
        error = %error,
        timestamp = %Utc::now().to_rfc3339(),
        "PUBLISHER_ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_noop() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
        log_error(
            "test",
            Some(1),
            &PublisherError::ListMissing("nightly".to_string()),
        );
    }
}
