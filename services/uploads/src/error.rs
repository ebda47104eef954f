use crate::model::UploadStatus;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the upload lifecycle
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("Credential issuer unavailable: {0}")]
    IssuerUnavailable(String),

    #[error("Failed to publish processing event: {0}")]
    PublishFailure(String),

    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    #[error("Record store failure: {0}")]
    StoreFailure(String),

    #[error("Upload {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("Upload {id} changed concurrently; expected status {expected}")]
    Conflict { id: Uuid, expected: UploadStatus },
}

impl UploadError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::NotFound(_) => "NOT_FOUND",
            UploadError::InvalidRequest(_) => "INVALID_REQUEST",
            UploadError::IssuerUnavailable(_) => "ISSUER_UNAVAILABLE",
            UploadError::PublishFailure(_) => "PUBLISH_FAILED",
            UploadError::ProcessingFailure(_) => "PROCESSING_ERROR",
            UploadError::StoreFailure(_) => "STORE_ERROR",
            UploadError::InvalidTransition { .. } => "INVALID_TRANSITION",
            UploadError::Conflict { .. } => "CONFLICT",
        }
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        UploadError::StoreFailure(e.to_string())
    }
}

/// Run `fut` with a deadline, mapping expiry through `on_elapsed`
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &str,
    on_elapsed: fn(String) -> UploadError,
    fut: F,
) -> Result<T, UploadError>
where
    F: Future<Output = Result<T, UploadError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed(format!("{operation} timed out after {limit:?}"))),
    }
}
