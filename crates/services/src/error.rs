//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::ValidationError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Coarse classification every service error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Validation,
    ServiceFailure,
}

impl From<&StorageError> for ErrorKind {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::ServiceFailure,
        }
    }
}

/// Errors emitted by `MediaUploader` implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UploadError {
    #[error("recording download failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("recording size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors emitted by `MeetingProvider` implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("meeting provider is not configured")]
    Disabled,
    #[error("meeting provider returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `JobScheduler` implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    #[error("no async runtime available to schedule jobs")]
    NoRuntime,
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("course not found: {0}")]
    CourseNotFound(String),
    #[error("lesson not found: {0}")]
    LessonNotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProgressError::CourseNotFound(_) | ProgressError::LessonNotFound(_) => {
                ErrorKind::NotFound
            }
            ProgressError::Validation(_) => ErrorKind::Validation,
            ProgressError::Storage(err) => err.into(),
        }
    }
}

/// Errors emitted by `RecordingService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IngestionError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServiceFailure
    }
}

/// Errors emitted by `AttendanceService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttendanceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AttendanceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServiceFailure
    }
}

/// Errors emitted by `WebhookService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WebhookError {
    #[error("missing webhook signature headers")]
    MissingSignature,
    #[error("webhook signature mismatch")]
    InvalidSignature,
    #[error("webhook timestamp is outside the accepted window")]
    StaleTimestamp,
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    #[error("webhook secret is not a usable signing key")]
    InvalidSecret,
    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
}

impl WebhookError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::StaleTimestamp => ErrorKind::Forbidden,
            WebhookError::Payload(_) => ErrorKind::Validation,
            WebhookError::SecretNotConfigured | WebhookError::InvalidSecret => {
                ErrorKind::ServiceFailure
            }
            WebhookError::Ingestion(err) => err.kind(),
            WebhookError::Attendance(err) => err.kind(),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
