//! Upload lifecycle state machine.
//!
//! ```text
//! PENDING ──► PROCESSING ──► COMPLETED
//!                 │  ▲
//!                 │  └── redelivery
//!                 └────► FAILED
//! ```
//!
//! Every transition is fetch, check, then a conditional write that only lands
//! if the status is still the one that was read.

use crate::error::{bounded, UploadError};
use crate::model::{ResultUrl, UploadRecord, UploadStatus};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

impl UploadStatus {
    /// COMPLETED and FAILED accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }

    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Pending, UploadStatus::Processing)
                | (UploadStatus::Processing, UploadStatus::Processing)
                | (UploadStatus::Processing, UploadStatus::Completed)
                | (UploadStatus::Processing, UploadStatus::Failed)
        )
    }
}

/// A requested status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Worker picked the event up
    Begin,
    /// Strategy produced a result
    Complete(ResultUrl),
    /// Strategy failed or was cancelled
    Fail,
}

impl Transition {
    pub fn target(&self) -> UploadStatus {
        match self {
            Transition::Begin => UploadStatus::Processing,
            Transition::Complete(_) => UploadStatus::Completed,
            Transition::Fail => UploadStatus::Failed,
        }
    }

    fn into_result_url(self) -> Option<String> {
        match self {
            Transition::Complete(url) => Some(url.into_string()),
            _ => None,
        }
    }
}

/// Applies transitions against the record store
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn RecordStore>,
    store_timeout: Duration,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn RecordStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Move a record along the state machine.
    ///
    /// Fails with `NotFound` when the record is absent, `InvalidTransition`
    /// when the table forbids the move, and `Conflict` when another writer
    /// changed the status between the read and the write.
    #[instrument(skip(self, transition), fields(upload_id = %id, to = %transition.target()))]
    pub async fn apply(
        &self,
        id: Uuid,
        transition: Transition,
    ) -> Result<UploadRecord, UploadError> {
        let current = bounded(
            self.store_timeout,
            "fetch upload",
            UploadError::StoreFailure,
            self.store.get(id),
        )
        .await?
        .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        let next = transition.target();
        if !current.status.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            });
        }

        let updated = bounded(
            self.store_timeout,
            "update upload status",
            UploadError::StoreFailure,
            self.store
                .update_status(id, current.status, next, transition.into_result_url()),
        )
        .await?
        .ok_or(UploadError::Conflict {
            id,
            expected: current.status,
        })?;

        debug!(from = %current.status, status = %updated.status, "Upload transitioned");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewUpload;
    use crate::store::{InMemoryRecordStore, MockRecordStore};

    fn pending() -> UploadRecord {
        UploadRecord::pending(
            Uuid::new_v4(),
            NewUpload {
                owner_id: "u1".to_string(),
                file_name: "a.png".to_string(),
                content_type: "image/png".to_string(),
                file_size: 10,
                caption: None,
            },
            "uploads/u1/1_x_a.png".to_string(),
        )
    }

    async fn seeded() -> (Lifecycle, Uuid) {
        let store = Arc::new(InMemoryRecordStore::new());
        let record = pending();
        store.create(&record).await.unwrap();
        (Lifecycle::new(store, Duration::from_secs(1)), record.id)
    }

    #[test]
    fn test_transition_table() {
        use UploadStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[tokio::test]
    async fn test_happy_path_sets_result_url() {
        let (lifecycle, id) = seeded().await;

        let processing = lifecycle.apply(id, Transition::Begin).await.unwrap();
        assert_eq!(processing.status, UploadStatus::Processing);
        assert!(processing.result_url.is_none());

        let url = ResultUrl::new("https://cdn/thumbs/x-thumb.jpg");
        let done = lifecycle.apply(id, Transition::Complete(url)).await.unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
        assert_eq!(done.result_url.as_deref(), Some("https://cdn/thumbs/x-thumb.jpg"));
    }

    #[tokio::test]
    async fn test_processing_can_restart() {
        let (lifecycle, id) = seeded().await;
        lifecycle.apply(id, Transition::Begin).await.unwrap();

        let again = lifecycle.apply(id, Transition::Begin).await.unwrap();
        assert_eq!(again.status, UploadStatus::Processing);
    }

    #[tokio::test]
    async fn test_terminal_never_regresses() {
        let (lifecycle, id) = seeded().await;
        lifecycle.apply(id, Transition::Begin).await.unwrap();
        lifecycle
            .apply(id, Transition::Complete(ResultUrl::new("https://r")))
            .await
            .unwrap();

        for transition in [Transition::Begin, Transition::Fail] {
            let err = lifecycle.apply(id, transition).await.unwrap_err();
            assert!(matches!(
                err,
                UploadError::InvalidTransition {
                    from: UploadStatus::Completed,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_skipping_processing_is_rejected() {
        let (lifecycle, id) = seeded().await;
        let err = lifecycle.apply(id, Transition::Fail).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let lifecycle = Lifecycle::new(store, Duration::from_secs(1));
        let err = lifecycle.apply(Uuid::new_v4(), Transition::Begin).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lost_race_is_conflict() {
        let record = pending();
        let id = record.id;

        let mut store = MockRecordStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(record.clone())));
        store.expect_update_status().returning(|_, _, _, _| Ok(None));

        let lifecycle = Lifecycle::new(Arc::new(store), Duration::from_secs(1));
        let err = lifecycle.apply(id, Transition::Begin).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Conflict {
                expected: UploadStatus::Pending,
                ..
            }
        ));
    }
}
