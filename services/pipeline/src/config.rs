//! Kafka configuration for the upload pipeline.
//!
//! Connection, security, reliability and topic settings shared by the
//! processing-event producer and the worker consumers.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

/// SASL mechanism for authentication
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaslMechanism {
    #[default]
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SSL/TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConfig {
    /// Path to CA certificate file
    pub ca_location: Option<String>,
    /// Path to client certificate file
    pub certificate_location: Option<String>,
    /// Path to client private key file
    pub key_location: Option<String>,
    /// Enable certificate verification
    #[serde(default = "default_true")]
    pub enable_verification: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            ca_location: None,
            certificate_location: None,
            key_location: None,
            enable_verification: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// SASL authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaslConfig {
    #[serde(default)]
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Delivery reliability configuration for the producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Number of broker-level retries for a failed send
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Retry backoff in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// How long a publish may wait for the broker acknowledgement
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Enable idempotent producer
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,
    /// Required acknowledgments: 0, 1, or all
    #[serde(default = "default_acks")]
    pub acks: String,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_acks() -> String {
    "all".to_string()
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            enable_idempotence: true,
            acks: default_acks(),
        }
    }
}

/// Producer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Linger time in milliseconds
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// Compression type: none, gzip, snappy, lz4, zstd
    #[serde(default = "default_compression")]
    pub compression_type: String,
    /// Maximum in-flight requests per connection. Kept at or below 5 so the
    /// idempotent producer preserves per-partition order on retry.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_requests: u32,
}

fn default_linger_ms() -> u64 {
    5
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_max_in_flight() -> u32 {
    5
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            linger_ms: default_linger_ms(),
            compression_type: default_compression(),
            max_in_flight_requests: default_max_in_flight(),
        }
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group ID; workers sharing it split the partitions
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Auto offset reset: earliest, latest, none
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Enable auto commit. Off by default: offsets are committed after a
    /// message has been handled.
    #[serde(default)]
    pub enable_auto_commit: bool,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Maximum poll interval in milliseconds. Must exceed the longest
    /// processing run or the group will rebalance mid-event.
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
}

fn default_group_id() -> String {
    "upload-processing-workers".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_max_poll_interval() -> u64 {
    300000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            enable_auto_commit: false,
            session_timeout_ms: default_session_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
        }
    }
}

/// Topic configuration for the upload pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic carrying processing events, keyed by upload id
    #[serde(default = "default_processing_topic")]
    pub processing: String,
}

fn default_processing_topic() -> String {
    "uploads.processing".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            processing: default_processing_topic(),
        }
    }
}

/// Main Kafka configuration for the upload pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    /// SSL configuration
    #[serde(default)]
    pub ssl: SslConfig,
    /// SASL configuration
    #[serde(default)]
    pub sasl: SaslConfig,
    /// Reliability settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Producer settings
    #[serde(default)]
    pub producer: ProducerConfig,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Topic configuration
    #[serde(default)]
    pub topics: TopicConfig,
    /// Additional librdkafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "upload-service".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            security_protocol: SecurityProtocol::default(),
            ssl: SslConfig::default(),
            sasl: SaslConfig::default(),
            reliability: ReliabilityConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            topics: TopicConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Create a new KafkaConfig with the specified bootstrap servers
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    /// Build a base rdkafka ClientConfig from this configuration
    fn build_base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("security.protocol", self.security_protocol.as_str());

        if let Some(ref ca) = self.ssl.ca_location {
            config.set("ssl.ca.location", ca);
        }
        if let Some(ref cert) = self.ssl.certificate_location {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(ref key) = self.ssl.key_location {
            config.set("ssl.key.location", key);
        }
        if !self.ssl.enable_verification {
            config.set("enable.ssl.certificate.verification", "false");
        }

        if self.security_protocol.uses_sasl() {
            config.set("sasl.mechanism", self.sasl.mechanism.as_str());
            if let Some(ref username) = self.sasl.username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.sasl.password {
                config.set("sasl.password", password);
            }
        }

        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// Build a producer ClientConfig
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("retries", self.reliability.retries.to_string());
        config.set("retry.backoff.ms", self.reliability.retry_backoff_ms.to_string());
        config.set(
            "request.timeout.ms",
            self.reliability.request_timeout_ms.to_string(),
        );
        config.set(
            "message.timeout.ms",
            self.reliability.request_timeout_ms.to_string(),
        );
        config.set("acks", &self.reliability.acks);

        if self.reliability.enable_idempotence {
            config.set("enable.idempotence", "true");
        }

        config.set("linger.ms", self.producer.linger_ms.to_string());
        config.set("compression.type", &self.producer.compression_type);
        config.set(
            "max.in.flight.requests.per.connection",
            self.producer.max_in_flight_requests.to_string(),
        );

        config
    }

    /// Build a consumer ClientConfig
    pub fn build_consumer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("group.id", &self.consumer.group_id);
        config.set("auto.offset.reset", &self.consumer.auto_offset_reset);
        config.set(
            "enable.auto.commit",
            self.consumer.enable_auto_commit.to_string(),
        );
        config.set(
            "session.timeout.ms",
            self.consumer.session_timeout_ms.to_string(),
        );
        config.set(
            "heartbeat.interval.ms",
            self.consumer.heartbeat_interval_ms.to_string(),
        );
        config.set(
            "max.poll.interval.ms",
            self.consumer.max_poll_interval_ms.to_string(),
        );

        config
    }

    /// Get the publish acknowledgement timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.reliability.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "bootstrap_servers".to_string(),
            ));
        }

        if self.consumer.group_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "consumer.group_id".to_string(),
            ));
        }

        if self.topics.processing.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "topics.processing".to_string(),
            ));
        }

        if self.security_protocol.uses_sasl() && self.sasl.username.is_none() {
            return Err(ConfigError::MissingRequired(
                "sasl.username (required for SASL)".to_string(),
            ));
        }

        if self.reliability.enable_idempotence && self.producer.max_in_flight_requests > 5 {
            return Err(ConfigError::InvalidValue {
                key: "producer.max_in_flight_requests".to_string(),
                message: "must be at most 5 with an idempotent producer".to_string(),
            });
        }

        Ok(())
    }
}
