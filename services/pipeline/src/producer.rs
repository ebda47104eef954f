//! Kafka producer wrapper for the upload pipeline.
//!
//! Every send waits for the broker's delivery report, so a caller that gets
//! `Ok` knows the event is durably on the topic.

use crate::config::KafkaConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    #[error("Failed to send message to topic {topic}: {message}")]
    SendError { topic: String, message: String },

    #[error("Producer timeout after {0:?}")]
    Timeout(Duration),
}

/// Result of a successful message delivery
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Topic the message was delivered to
    pub topic: String,
    /// Partition the message was delivered to
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Message key (if provided)
    pub key: Option<String>,
}

/// Message to be sent to Kafka
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Topic to send the message to
    pub topic: String,
    /// Partitioning key; messages sharing a key keep their relative order
    pub key: Option<String>,
    /// Serialized message payload
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    /// Create a new outgoing message with a JSON payload
    pub fn new_json<T: serde::Serialize>(
        topic: impl Into<String>,
        message: &T,
    ) -> Result<Self, ProducerError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| ProducerError::SerializationError(e.to_string()))?;
        Ok(Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
        })
    }

    /// Set the message key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a header to the message
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add a correlation ID header
    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_header("correlation-id", id)
    }

    /// Add a message type header
    pub fn with_message_type(self, msg_type: impl Into<String>) -> Self {
        self.with_header("message-type", msg_type)
    }

    fn kafka_headers(&self) -> OwnedHeaders {
        self.headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_bytes()),
                })
            })
    }
}

/// Kafka producer that resolves each send to its delivery report
pub struct PipelineProducer {
    producer: FutureProducer,
    config: Arc<KafkaConfig>,
    default_timeout: Duration,
}

impl PipelineProducer {
    /// Create a new producer with the given configuration
    pub fn new(config: KafkaConfig) -> Result<Self, ProducerError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::CreationError(e.to_string()))?;

        let default_timeout = config.request_timeout();

        Ok(Self {
            producer,
            config: Arc::new(config),
            default_timeout,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Send a message and wait for delivery confirmation
    pub async fn send(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError> {
        self.send_with_timeout(message, self.default_timeout).await
    }

    /// Send a message with a custom queueing timeout
    #[instrument(skip(self, message), fields(topic = %message.topic, key = ?message.key))]
    pub async fn send_with_timeout(
        &self,
        message: OutgoingMessage,
        timeout: Duration,
    ) -> Result<DeliveryResult, ProducerError> {
        let topic = message.topic.clone();
        let key = message.key.clone();

        let mut record = FutureRecord::to(&topic)
            .payload(&message.payload)
            .headers(message.kafka_headers());

        if let Some(ref k) = key {
            record = record.key(k);
        }

        debug!(size_bytes = message.payload.len(), "Sending message");

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(timeout))
            .await
            .map_err(|(e, _)| ProducerError::SendError {
                topic: topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Message delivered");

        Ok(DeliveryResult {
            topic,
            partition,
            offset,
            key,
        })
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::Timeout(timeout))
    }

    /// Number of messages still waiting for a delivery report
    fn queue_len(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }
}

impl Drop for PipelineProducer {
    fn drop(&mut self) {
        info!(in_flight = self.queue_len(), "Shutting down Kafka producer");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!(error = %e, "Failed to flush producer on shutdown");
        }
    }
}
