use crate::error::UploadError;
use crate::model::{ProcessingEvent, ResultUrl};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Why a processing run produced no result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Processing was cancelled")]
    Cancelled,

    #[error("Processing failed: {0}")]
    Failed(String),
}

impl From<ProcessingError> for UploadError {
    fn from(e: ProcessingError) -> Self {
        UploadError::ProcessingFailure(e.to_string())
    }
}

/// The post-upload work a worker performs for each event.
///
/// May be invoked more than once for the same upload after a redelivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    async fn run(
        &self,
        event: &ProcessingEvent,
        cancel: &CancellationToken,
    ) -> Result<ResultUrl, ProcessingError>;
}

/// Stand-in for thumbnail generation: waits, then points at a derived URL
pub struct SimulatedStrategy {
    delay: Duration,
    result_url_base: String,
}

impl SimulatedStrategy {
    pub fn new(delay: Duration, result_url_base: impl Into<String>) -> Self {
        Self {
            delay,
            result_url_base: result_url_base.into(),
        }
    }
}

#[async_trait]
impl ProcessingStrategy for SimulatedStrategy {
    #[instrument(skip(self, event, cancel), fields(upload_id = %event.upload_id))]
    async fn run(
        &self,
        event: &ProcessingEvent,
        cancel: &CancellationToken,
    ) -> Result<ResultUrl, ProcessingError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Simulated processing cancelled");
                Err(ProcessingError::Cancelled)
            }
            _ = tokio::time::sleep(self.delay) => {
                Ok(ResultUrl::new(format!(
                    "{}/{}-thumb.jpg",
                    self.result_url_base, event.upload_id
                )))
            }
        }
    }
}
