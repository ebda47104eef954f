use anyhow::{bail, Context};
use serde::Deserialize;
use std::time::Duration;
use upload_pipeline::KafkaConfig;

/// Main configuration for the upload service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Object storage configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Record store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Event bus backend selection
    #[serde(default)]
    pub event_bus: EventBusConfig,
    /// Kafka settings, used when `event_bus.backend = "kafka"`
    #[serde(default)]
    pub kafka: KafkaConfig,
    /// Processing worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Deadlines on collaborator calls
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest `fileSize` accepted at intake
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket the upload credentials are scoped to
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Lifetime of an issued upload credential
    #[serde(default = "default_presigned_url_expiration_minutes")]
    pub presigned_url_expiration_minutes: u64,
}

/// Longest lifetime S3 accepts for a presigned URL (7 days)
pub const MAX_PRESIGNED_URL_EXPIRATION_MINUTES: u64 = 7 * 24 * 60;

impl S3Config {
    /// Credential lifetime as Duration
    pub fn presigned_url_expiration(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiration_minutes.saturating_mul(60))
    }
}

/// Which record store implementation to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Record store backend
    #[serde(default)]
    pub backend: StoreBackend,
    /// PostgreSQL connection URL, required for the postgres backend
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which event bus implementation to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBusConfig {
    #[serde(default)]
    pub backend: BusBackend,
}

/// Processing worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Consumers started in the processing group
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    /// Simulated processing latency
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,
    /// Prefix for result URLs; derived from the bucket when unset
    pub result_url_base: Option<String>,
    /// How long in-flight work may run after shutdown is requested
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Deadlines on collaborator calls
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_ms")]
    pub issuer_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub store_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiration_minutes() -> u64 {
    15
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_consumers() -> usize {
    1
}

fn default_processing_delay_ms() -> u64 {
    2000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/uploads").required(false))
            .add_source(config::File::with_name("/etc/uploads/uploads").required(false))
            // UPLOADS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOADS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot start
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            bail!("s3.bucket must not be empty");
        }
        if self.s3.presigned_url_expiration_minutes == 0 {
            bail!("s3.presigned_url_expiration_minutes must be greater than zero");
        }
        if self.s3.presigned_url_expiration_minutes > MAX_PRESIGNED_URL_EXPIRATION_MINUTES {
            bail!(
                "s3.presigned_url_expiration_minutes must be at most {}",
                MAX_PRESIGNED_URL_EXPIRATION_MINUTES
            );
        }
        if self.database.backend == StoreBackend::Postgres && self.database.url.is_none() {
            bail!("database.url is required for the postgres backend");
        }
        if self.event_bus.backend == BusBackend::Kafka {
            self.kafka.validate().context("Invalid kafka configuration")?;
        }
        if self.worker.consumers == 0 {
            bail!("worker.consumers must be at least 1");
        }
        Ok(())
    }

    /// Credential lifetime as Duration
    pub fn presigned_url_expiration(&self) -> Duration {
        self.s3.presigned_url_expiration()
    }

    pub fn issuer_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.issuer_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.store_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.worker.processing_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.worker.shutdown_grace_secs)
    }

    /// Base for result URLs, e.g. `https://uploads.s3.amazonaws.com/thumbnails`
    pub fn result_url_base(&self) -> String {
        match &self.worker.result_url_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.amazonaws.com/thumbnails", self.s3.bucket),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiration_minutes: default_presigned_url_expiration_minutes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumers: default_consumers(),
            processing_delay_ms: default_processing_delay_ms(),
            result_url_base: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            issuer_ms: default_timeout_ms(),
            store_ms: default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let config = from_toml("");

        assert_eq!(config.service.name, "upload-service");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.s3.bucket, "uploads");
        assert_eq!(config.s3.presigned_url_expiration_minutes, 15);
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.event_bus.backend, BusBackend::Memory);
        assert_eq!(config.worker.processing_delay_ms, 2000);
        assert_eq!(config.kafka.topics.processing, "uploads.processing");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backends_parse_lowercase() {
        let config = from_toml(
            r#"
            [database]
            backend = "postgres"
            url = "postgres://localhost/uploads"

            [event_bus]
            backend = "kafka"
            "#,
        );

        assert_eq!(config.database.backend, StoreBackend::Postgres);
        assert_eq!(config.event_bus.backend, BusBackend::Kafka);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = Config::default();
        config.database.backend = StoreBackend::Postgres;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_result_url_base() {
        let mut config = Config::default();
        config.s3.bucket = "my-bucket".to_string();
        assert_eq!(
            config.result_url_base(),
            "https://my-bucket.s3.amazonaws.com/thumbnails"
        );

        config.worker.result_url_base = Some("https://cdn.example.com/thumbs/".to_string());
        assert_eq!(config.result_url_base(), "https://cdn.example.com/thumbs");
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.presigned_url_expiration(), Duration::from_secs(900));
        assert_eq!(config.issuer_timeout(), Duration::from_millis(5000));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_expiration_capped_at_seven_days() {
        let mut config = Config::default();
        config.s3.presigned_url_expiration_minutes = MAX_PRESIGNED_URL_EXPIRATION_MINUTES;
        assert!(config.validate().is_ok());

        config.s3.presigned_url_expiration_minutes = MAX_PRESIGNED_URL_EXPIRATION_MINUTES + 1;
        assert!(config.validate().is_err());

        config.s3.presigned_url_expiration_minutes = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(
            config.presigned_url_expiration(),
            Duration::from_secs(u64::MAX)
        );
    }
}
