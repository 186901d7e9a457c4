//! Error types shared across the crate.

use crate::models::ScanStatus;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the external scanning engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine ran and reported failure. Worth another attempt.
    #[error("engine reported failure: {0}")]
    Reported(String),

    #[error("engine could not be launched: {0}")]
    Launch(String),

    /// The run task died outside the engine's own error reporting.
    #[error("engine run crashed: {0}")]
    Crashed(String),

    #[error("telemetry unavailable: {0}")]
    Telemetry(String),

    #[error("sandbox command failed: {0}")]
    Sandbox(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the executor may retry the run after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Reported(_))
    }
}

/// Scan store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("scan not found: {0}")]
    NotFound(Uuid),

    #[error("scan already exists: {0}")]
    Duplicate(Uuid),

    #[error("cannot apply {update} to scan in status {from}")]
    InvalidTransition { from: ScanStatus, update: &'static str },

    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Report extraction failures. Always recovered with the fallback report.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("extraction request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("extraction API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("extraction refused: {0}")]
    Refused(String),

    #[error("extraction returned no content")]
    Empty,

    #[error("extraction output is not a valid report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("extraction is not configured: {0}")]
    NotConfigured(String),
}

/// Notification delivery failures. Logged and swallowed by callers.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook rejected notification with status {0}")]
    Rejected(u16),

    #[error("notification timed out")]
    Timeout,
}

/// Errors surfaced to callers of the public operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("scan not found")]
    NotFound,

    #[error("scan is not completed (status: {status})")]
    NotCompleted { status: ScanStatus },

    #[error("forbidden")]
    Forbidden,

    #[error("rate limit exceeded: {limit} scans per month")]
    RateLimited { limit: u32 },

    #[error("{0}")]
    Invalid(String),

    #[error("storage unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl ServiceError {
    /// Maps store errors, turning a missing scan into `NotFound`.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ServiceError::NotFound,
            other => ServiceError::Unavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_reported_failures_retry() {
        assert!(EngineError::Reported("exit status 1".into()).is_retryable());
        assert!(!EngineError::Crashed("panic".into()).is_retryable());
        assert!(!EngineError::Launch("not found".into()).is_retryable());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err = ServiceError::from_store(StoreError::NotFound(Uuid::nil()));
        assert!(matches!(err, ServiceError::NotFound));

        let err = ServiceError::from_store(StoreError::Duplicate(Uuid::nil()));
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = ServiceError::NotCompleted {
            status: ScanStatus::Running,
        };
        assert_eq!(err.to_string(), "scan is not completed (status: running)");
        assert_eq!(
            ServiceError::RateLimited { limit: 3 }.to_string(),
            "rate limit exceeded: 3 scans per month"
        );
    }
}
