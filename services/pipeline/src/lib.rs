//! Upload Pipeline - Kafka event bus for the upload processing pipeline
//!
//! This library carries processing events between the request path and the
//! processing workers. It handles:
//!
//! - Keyed JSON publication with broker acknowledgement (per-key ordering)
//! - Consumer-group subscription with manual offset commits
//! - Cooperative shutdown of the consumption loop
//!
//! Delivery is at-least-once: offsets are committed only after a handler
//! returns `Ok`, so a crash mid-handle leads to redelivery.
//!
//! # Example
//!
//! ```rust,no_run
//! use upload_pipeline::{KafkaConfig, OutgoingMessage, PipelineConsumer, PipelineProducer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = KafkaConfig::new("localhost:9092");
//!     let producer = PipelineProducer::new(config.clone())?;
//!
//!     let message = OutgoingMessage::new_json(&config.topics.processing, &"payload")?
//!         .with_key("upload-id");
//!     producer.send(message).await?;
//!
//!     let consumer = PipelineConsumer::new(config)?;
//!     consumer.subscribe_processing()?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod producer;

// Re-export main types
pub use config::{
    ConfigError, ConsumerConfig, KafkaConfig, ProducerConfig, ReliabilityConfig, SaslConfig,
    SaslMechanism, SecurityProtocol, SslConfig, TopicConfig,
};
pub use consumer::{
    async_trait, ConsumerBuilder, ConsumerError, IncomingMessage, MessageHandler,
    MessageMetadata, PipelineConsumer,
};
pub use producer::{DeliveryResult, OutgoingMessage, PipelineProducer, ProducerError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::KafkaConfig;
    pub use crate::consumer::{
        async_trait, ConsumerError, IncomingMessage, MessageHandler, PipelineConsumer,
    };
    pub use crate::producer::{OutgoingMessage, PipelineProducer, ProducerError};
}
