use crate::error::UploadError;
use crate::model::{ProcessingEvent, PublishReceipt};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use upload_pipeline::{OutgoingMessage, PipelineProducer};

/// Header value identifying processing events on the wire
pub const PROCESSING_MESSAGE_TYPE: &str = "upload_processing";

/// Publishes processing events keyed by upload id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Resolves once the bus has acknowledged the event
    async fn publish(&self, event: &ProcessingEvent) -> Result<PublishReceipt, UploadError>;
}

/// Kafka-backed publisher
pub struct KafkaEventPublisher {
    producer: Arc<PipelineProducer>,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(producer: Arc<PipelineProducer>) -> Self {
        let topic = producer.config().topics.processing.clone();
        Self { producer, topic }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    #[instrument(skip(self, event), fields(upload_id = %event.upload_id, topic = %self.topic))]
    async fn publish(&self, event: &ProcessingEvent) -> Result<PublishReceipt, UploadError> {
        let message = processing_message(&self.topic, event)?;

        let delivery = self
            .producer
            .send(message)
            .await
            .map_err(|e| UploadError::PublishFailure(e.to_string()))?;

        debug!(
            partition = delivery.partition,
            offset = delivery.offset,
            "Processing event acknowledged"
        );

        Ok(PublishReceipt {
            partition: Some(delivery.partition),
            offset: Some(delivery.offset),
        })
    }
}

/// Keyed JSON message for a processing event
pub fn processing_message(
    topic: &str,
    event: &ProcessingEvent,
) -> Result<OutgoingMessage, UploadError> {
    let id = event.upload_id.to_string();
    Ok(OutgoingMessage::new_json(topic, event)
        .map_err(|e| UploadError::PublishFailure(e.to_string()))?
        .with_key(id.clone())
        .with_message_type(PROCESSING_MESSAGE_TYPE)
        .with_correlation_id(id))
}

/// Published events retained for inspection by [`InMemoryEventBus::published`]
pub const PUBLISHED_LOG_CAPACITY: usize = 256;

/// In-process bus: a single FIFO channel drained by the local worker.
///
/// The most recent [`PUBLISHED_LOG_CAPACITY`] events are also kept so callers
/// can inspect what went out.
#[derive(Clone)]
pub struct InMemoryEventBus {
    tx: mpsc::UnboundedSender<ProcessingEvent>,
    log: Arc<Mutex<PublishLog>>,
}

#[derive(Default)]
struct PublishLog {
    next_offset: i64,
    recent: VecDeque<ProcessingEvent>,
}

impl InMemoryEventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Self {
            tx,
            log: Arc::new(Mutex::new(PublishLog::default())),
        };
        (bus, rx)
    }

    /// Recently published events, oldest first
    pub fn published(&self) -> Vec<ProcessingEvent> {
        self.log.lock().recent.iter().cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: &ProcessingEvent) -> Result<PublishReceipt, UploadError> {
        let offset = {
            let mut log = self.log.lock();
            self.tx
                .send(event.clone())
                .map_err(|_| UploadError::PublishFailure("processing channel closed".to_string()))?;

            if log.recent.len() == PUBLISHED_LOG_CAPACITY {
                log.recent.pop_front();
            }
            log.recent.push_back(event.clone());

            let offset = log.next_offset;
            log.next_offset += 1;
            offset
        };

        Ok(PublishReceipt {
            partition: Some(0),
            offset: Some(offset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event() -> ProcessingEvent {
        ProcessingEvent {
            upload_id: Uuid::new_v4(),
            owner_id: "u1".to_string(),
            storage_key: "uploads/u1/1_x_a_b.png".to_string(),
            file_name: "a b.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_processing_message_is_keyed_by_upload() {
        let event = event();
        let message = processing_message("uploads.processing", &event).unwrap();
        let id = event.upload_id.to_string();

        assert_eq!(message.topic, "uploads.processing");
        assert_eq!(message.key.as_deref(), Some(id.as_str()));
        assert_eq!(
            message.headers,
            vec![
                ("message-type".to_string(), PROCESSING_MESSAGE_TYPE.to_string()),
                ("correlation-id".to_string(), id.clone()),
            ]
        );

        let decoded: ProcessingEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn test_in_memory_bus_is_fifo() {
        let (bus, mut rx) = InMemoryEventBus::new();
        let first = event();
        let second = event();

        let r1 = bus.publish(&first).await.unwrap();
        let r2 = bus.publish(&second).await.unwrap();
        assert_eq!(r1.offset, Some(0));
        assert_eq!(r2.offset, Some(1));

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
        assert_eq!(bus.published(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_closed_channel_is_publish_failure() {
        let (bus, rx) = InMemoryEventBus::new();
        drop(rx);

        let result = bus.publish(&event()).await;
        assert!(matches!(result, Err(UploadError::PublishFailure(_))));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_published_log_is_bounded() {
        let (bus, mut rx) = InMemoryEventBus::new();
        let events: Vec<_> = (0..PUBLISHED_LOG_CAPACITY + 10).map(|_| event()).collect();

        let mut last = None;
        for e in &events {
            last = bus.publish(e).await.unwrap().offset;
            rx.recv().await.unwrap();
        }

        assert_eq!(last, Some((PUBLISHED_LOG_CAPACITY + 9) as i64));
        let published = bus.published();
        assert_eq!(published.len(), PUBLISHED_LOG_CAPACITY);
        assert_eq!(published.first(), events.get(10));
        assert_eq!(published.last(), events.last());
    }
}
