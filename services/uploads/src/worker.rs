//! Processing worker: consumes processing events and drives each upload to a
//! terminal state.
//!
//! Each event costs exactly two status writes, `PROCESSING` before the strategy
//! runs and `COMPLETED`/`FAILED` after. Redeliveries for finished uploads are
//! skipped without invoking the strategy.

use crate::bus::PROCESSING_MESSAGE_TYPE;
use crate::error::UploadError;
use crate::lifecycle::{Lifecycle, Transition};
use crate::model::{ProcessingEvent, ResultUrl};
use crate::strategy::{ProcessingError, ProcessingStrategy};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use upload_pipeline::{async_trait, ConsumerError, IncomingMessage, MessageHandler};
use uuid::Uuid;

/// Why an event was acknowledged without running to a terminal write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No record for the event's upload id
    Missing,
    /// Record already COMPLETED or FAILED
    AlreadyTerminal,
    /// Another worker moved the record first
    Superseded,
}

/// What happened to one processing event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Completed(ResultUrl),
    Failed(ProcessingError),
    Skipped(SkipReason),
}

pub struct ProcessingWorker {
    lifecycle: Lifecycle,
    strategy: Arc<dyn ProcessingStrategy>,
    cancel: CancellationToken,
}

impl ProcessingWorker {
    /// `cancel` is handed to every strategy run; cancelling it fails in-flight work
    pub fn new(
        lifecycle: Lifecycle,
        strategy: Arc<dyn ProcessingStrategy>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lifecycle,
            strategy,
            cancel,
        }
    }

    /// Handle one event.
    ///
    /// Strategy failures, including a blank result URL, become a FAILED record
    /// and `Ok`. If the final write hits a store failure, one FAILED write is
    /// attempted so the record does not stay PROCESSING. `Err` means a store
    /// failure left the outcome unrecorded; the event is not retried.
    #[instrument(skip(self, event), fields(upload_id = %event.upload_id, storage_key = %event.storage_key))]
    pub async fn process(&self, event: &ProcessingEvent) -> Result<ProcessingOutcome, UploadError> {
        let id = event.upload_id;

        match self.lifecycle.apply(id, Transition::Begin).await {
            Ok(_) => {}
            Err(e) => return skip_or_propagate(e),
        }

        let started = Instant::now();
        let result = self
            .strategy
            .run(event, &self.cancel)
            .await
            .and_then(|url| {
                if url.is_blank() {
                    Err(ProcessingError::Failed(
                        "strategy returned an empty result URL".to_string(),
                    ))
                } else {
                    Ok(url)
                }
            });
        metrics::histogram!("uploads.processing.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let (transition, outcome) = match result {
            Ok(url) => (
                Transition::Complete(url.clone()),
                ProcessingOutcome::Completed(url),
            ),
            Err(e) => {
                warn!(
                    error = %UploadError::from(e.clone()),
                    "Processing strategy did not produce a result"
                );
                (Transition::Fail, ProcessingOutcome::Failed(e))
            }
        };

        if let Err(e) = self.lifecycle.apply(id, transition).await {
            return match skip_or_propagate(e) {
                Err(e) => self.fall_back_to_failed(id, e).await,
                skipped => skipped,
            };
        }

        match &outcome {
            ProcessingOutcome::Completed(url) => {
                metrics::counter!("uploads.processing.completed").increment(1);
                info!(result_url = %url, "Upload processing completed");
            }
            ProcessingOutcome::Failed(_) => {
                metrics::counter!("uploads.processing.failed").increment(1);
                info!("Upload processing failed");
            }
            ProcessingOutcome::Skipped(_) => {}
        }

        Ok(outcome)
    }

    /// Mark the upload FAILED after its outcome could not be written
    async fn fall_back_to_failed(
        &self,
        id: Uuid,
        cause: UploadError,
    ) -> Result<ProcessingOutcome, UploadError> {
        error!(error = %cause, "Failed to record processing outcome; marking upload failed");

        match self.lifecycle.apply(id, Transition::Fail).await {
            Ok(_) => {
                metrics::counter!("uploads.processing.failed").increment(1);
                Ok(ProcessingOutcome::Failed(ProcessingError::Failed(format!(
                    "outcome not recorded: {cause}"
                ))))
            }
            Err(e) => match skip_or_propagate(e) {
                Err(e) => {
                    error!(error = %e, "Upload left in PROCESSING");
                    Err(cause)
                }
                skipped => skipped,
            },
        }
    }

    /// Drain an in-process event channel until it closes or `stop` fires.
    ///
    /// An event already being processed when `stop` fires runs to completion.
    /// An event whose outcome could not be recorded is logged and dropped.
    pub async fn run_local(
        &self,
        mut events: mpsc::UnboundedReceiver<ProcessingEvent>,
        stop: CancellationToken,
    ) {
        info!("Starting local processing worker");

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.process(&event).await {
                error!(upload_id = %event.upload_id, error = %e, "Dropping processing event");
            }
        }

        info!("Local processing worker stopped");
    }
}

fn skip_or_propagate(error: UploadError) -> Result<ProcessingOutcome, UploadError> {
    let reason = match error {
        UploadError::NotFound(_) => SkipReason::Missing,
        UploadError::InvalidTransition { from, .. } if from.is_terminal() => {
            SkipReason::AlreadyTerminal
        }
        UploadError::InvalidTransition { .. } | UploadError::Conflict { .. } => {
            SkipReason::Superseded
        }
        other => return Err(other),
    };

    metrics::counter!("uploads.processing.skipped").increment(1);
    info!(reason = ?reason, "Skipping processing event");
    Ok(ProcessingOutcome::Skipped(reason))
}

#[async_trait]
impl MessageHandler for ProcessingWorker {
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
        if let Some(kind) = message.message_type() {
            if kind != PROCESSING_MESSAGE_TYPE {
                debug!(message_type = kind, "Ignoring message of another type");
                return Ok(());
            }
        }

        let event: ProcessingEvent = message.decode_json()?;
        let span = info_span!(
            "processing_message",
            correlation_id = message.correlation_id().unwrap_or("-"),
            partition = message.metadata.partition,
            offset = message.metadata.offset,
        );

        self.process(&event)
            .instrument(span)
            .await
            .map(|_| ())
            .map_err(|e| ConsumerError::ProcessingError(e.to_string()))
    }
}
