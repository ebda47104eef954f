//! Kafka consumer wrapper for the upload pipeline.
//!
//! A [`PipelineConsumer`] joins a consumer group, feeds each message to a
//! [`MessageHandler`] one at a time and commits the offset once the handler
//! succeeds. Handling messages sequentially keeps per-partition order, which is
//! what gives each upload id its ordering guarantee.

use crate::config::KafkaConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as KafkaMessage};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topics: {0}")]
    SubscriptionError(String),

    #[error("Failed to deserialize message: {0}")]
    DeserializationError(String),

    #[error("Failed to commit offset: {0}")]
    CommitError(String),

    #[error("Message processing error: {0}")]
    ProcessingError(String),
}

/// Metadata about a received message
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    /// Topic the message was received from
    pub topic: String,
    /// Partition the message was received from
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Message key (if present)
    pub key: Option<Vec<u8>>,
    /// Timestamp of the message
    pub timestamp: Option<i64>,
    /// Message headers
    pub headers: HashMap<String, String>,
}

/// A received message with payload and metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Message metadata
    pub metadata: MessageMetadata,
}

impl IncomingMessage {
    /// Deserialize the payload as JSON
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConsumerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ConsumerError::DeserializationError(e.to_string()))
    }

    /// Get the message key as a string
    pub fn key_str(&self) -> Option<&str> {
        self.metadata
            .key
            .as_deref()
            .and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.metadata.headers.get(key).map(|s| s.as_str())
    }

    /// Get the correlation ID header
    pub fn correlation_id(&self) -> Option<&str> {
        self.header("correlation-id")
    }

    /// Get the message type header
    pub fn message_type(&self) -> Option<&str> {
        self.header("message-type")
    }
}

/// Handler trait for processing messages
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a single message. Returning `Ok` lets the consumer commit it.
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError>;

    /// Called when message processing fails.
    ///
    /// The failed message is not committed on its own, but the next commit on
    /// the same partition moves past it, so it is not redelivered while this
    /// consumer keeps running.
    async fn on_error(&self, message: IncomingMessage, error: ConsumerError) {
        warn!(
            topic = %message.metadata.topic,
            partition = message.metadata.partition,
            offset = message.metadata.offset,
            error = %error,
            "Message processing failed"
        );
    }
}

/// Consumer-group member driving a [`MessageHandler`]
pub struct PipelineConsumer {
    consumer: StreamConsumer,
    config: Arc<KafkaConfig>,
    shutdown_tx: watch::Sender<bool>,
}

impl PipelineConsumer {
    /// Create a new consumer with the given configuration
    pub fn new(config: KafkaConfig) -> Result<Self, ConsumerError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group = %config.consumer.group_id,
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| ConsumerError::CreationError(e.to_string()))?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            consumer,
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Subscribe to the specified topics
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ConsumerError> {
        info!(?topics, "Subscribing to topics");
        self.consumer
            .subscribe(topics)
            .map_err(|e| ConsumerError::SubscriptionError(e.to_string()))
    }

    /// Subscribe to the processing-event topic
    pub fn subscribe_processing(&self) -> Result<(), ConsumerError> {
        self.subscribe(&[self.config.topics.processing.as_str()])
    }

    /// Commit the current offsets synchronously
    pub fn commit(&self) -> Result<(), ConsumerError> {
        self.consumer
            .commit_consumer_state(CommitMode::Sync)
            .map_err(|e| ConsumerError::CommitError(e.to_string()))
    }

    /// Signal the consumption loop to stop after the current message
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        self.shutdown_tx.send_replace(true);
    }

    /// Start consuming messages and process them with the given handler.
    ///
    /// Returns once [`shutdown`](Self::shutdown) is called or the stream ends.
    /// A message being handled when shutdown is requested runs to completion.
    #[instrument(skip(self, handler), fields(group = %self.config.consumer.group_id))]
    pub async fn run<H: MessageHandler + ?Sized>(
        &self,
        handler: Arc<H>,
    ) -> Result<(), ConsumerError> {
        use tokio_stream::StreamExt;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        info!("Starting message consumption loop");

        while !*shutdown_rx.borrow_and_update() {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    continue;
                }
                message_result = stream.next() => {
                    match message_result {
                        Some(Ok(borrowed_message)) => {
                            let incoming = convert_message(&borrowed_message);

                            debug!(
                                topic = %incoming.metadata.topic,
                                partition = incoming.metadata.partition,
                                offset = incoming.metadata.offset,
                                "Received message"
                            );

                            match handler.handle(incoming.clone()).await {
                                Ok(()) => {
                                    if !self.config.consumer.enable_auto_commit {
                                        if let Err(e) = self
                                            .consumer
                                            .commit_message(&borrowed_message, CommitMode::Async)
                                        {
                                            warn!(error = %e, "Failed to commit offset");
                                        }
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, "Message processing failed");
                                    handler.on_error(incoming, e).await;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Kafka error");
                        }
                        None => {
                            debug!("Stream ended");
                            break;
                        }
                    }
                }
            }
        }

        info!("Consumption loop stopped");

        if !self.config.consumer.enable_auto_commit {
            if let Err(e) = self.commit() {
                warn!(error = %e, "Failed to commit on shutdown");
            }
        }

        Ok(())
    }
}

/// Convert a borrowed Kafka message to an owned [`IncomingMessage`]
fn convert_message<M: KafkaMessage>(msg: &M) -> IncomingMessage {
    let payload = msg.payload().unwrap_or(&[]).to_vec();
    let key = msg.key().map(|k| k.to_vec());

    let mut headers = HashMap::new();
    if let Some(h) = msg.headers() {
        for header in h.iter() {
            if let Some(Ok(v)) = header.value.map(std::str::from_utf8) {
                headers.insert(header.key.to_string(), v.to_string());
            }
        }
    }

    IncomingMessage {
        payload,
        metadata: MessageMetadata {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            timestamp: msg.timestamp().to_millis(),
            headers,
        },
    }
}

/// Builder for creating consumers with custom settings
pub struct ConsumerBuilder {
    config: KafkaConfig,
}

impl ConsumerBuilder {
    /// Start from an existing configuration
    pub fn from_config(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Set the consumer group ID
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.config.consumer.group_id = group_id.into();
        self
    }

    /// Set the client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Build the consumer
    pub fn build(self) -> Result<PipelineConsumer, ConsumerError> {
        PipelineConsumer::new(self.config)
    }
}

/// Async trait for message handlers (re-export for convenience)
pub use async_trait::async_trait;
