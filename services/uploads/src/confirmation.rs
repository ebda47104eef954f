use crate::bus::EventPublisher;
use crate::error::{bounded, UploadError};
use crate::model::{ProcessingEvent, PublishReceipt};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Hands confirmed uploads to the processing pipeline
#[derive(Clone)]
pub struct ConfirmationService {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    store_timeout: Duration,
}

impl ConfirmationService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            store_timeout,
        }
    }

    /// Publish a processing event for `id`.
    ///
    /// The record's status is left untouched; the worker moves it. Status is not
    /// inspected either, so confirming a finished upload publishes an event the
    /// worker will skip.
    #[instrument(skip(self), fields(upload_id = %id))]
    pub async fn confirm(&self, id: Uuid) -> Result<PublishReceipt, UploadError> {
        let record = bounded(
            self.store_timeout,
            "fetch upload",
            UploadError::StoreFailure,
            self.store.get(id),
        )
        .await?
        .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        let event = ProcessingEvent::from(&record);

        match self.publisher.publish(&event).await {
            Ok(receipt) => {
                metrics::counter!("uploads.confirmed").increment(1);
                info!(
                    storage_key = %record.storage_key,
                    partition = ?receipt.partition,
                    offset = ?receipt.offset,
                    "Processing event published"
                );
                Ok(receipt)
            }
            Err(e) => {
                metrics::counter!("uploads.publish.failed").increment(1);
                error!(error = %e, "Failed to publish processing event; upload stays PENDING");
                Err(match e {
                    UploadError::PublishFailure(_) => e,
                    other => UploadError::PublishFailure(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryEventBus, MockEventPublisher};
    use crate::model::{NewUpload, UploadRecord, UploadStatus};
    use crate::store::InMemoryRecordStore;

    async fn seeded_store() -> (Arc<InMemoryRecordStore>, UploadRecord) {
        let store = Arc::new(InMemoryRecordStore::new());
        let record = UploadRecord::pending(
            Uuid::new_v4(),
            NewUpload {
                owner_id: "u1".to_string(),
                file_name: "a b.png".to_string(),
                content_type: "image/png".to_string(),
                file_size: 100,
                caption: None,
            },
            "uploads/u1/1_x_a_b.png".to_string(),
        );
        store.create(&record).await.unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn test_confirm_publishes_snapshot() {
        let (store, record) = seeded_store().await;
        let (bus, mut rx) = InMemoryEventBus::new();
        let service = ConfirmationService::new(store.clone(), Arc::new(bus), Duration::from_secs(1));

        service.confirm(record.id).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.upload_id, record.id);
        assert_eq!(event.owner_id, "u1");
        assert_eq!(event.storage_key, record.storage_key);
        assert_eq!(event.file_name, "a b.png");
        assert_eq!(event.content_type, "image/png");

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_id_publishes_nothing() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();

        let service = ConfirmationService::new(store, Arc::new(publisher), Duration::from_secs(1));
        let err = service.confirm(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_pending() {
        let (store, record) = seeded_store().await;
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(UploadError::PublishFailure("broker unreachable".to_string())));

        let service = ConfirmationService::new(store.clone(), Arc::new(publisher), Duration::from_secs(1));
        let err = service.confirm(record.id).await.unwrap_err();
        assert!(matches!(err, UploadError::PublishFailure(_)));

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_reconfirm_publishes_again() {
        let (store, record) = seeded_store().await;
        let (bus, _rx) = InMemoryEventBus::new();
        let service = ConfirmationService::new(store, Arc::new(bus.clone()), Duration::from_secs(1));

        service.confirm(record.id).await.unwrap();
        service.confirm(record.id).await.unwrap();
        assert_eq!(bus.published().len(), 2);
    }
}
