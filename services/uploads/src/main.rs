use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_pipeline::{ConsumerBuilder, PipelineConsumer, PipelineProducer};
use upload_service::config::{BusBackend, StoreBackend};
use upload_service::{
    start_api_server, AppState, Config, ConfirmationService, CredentialIssuer, EventPublisher,
    InMemoryEventBus, InMemoryRecordStore, IntakeService, KafkaEventPublisher, Lifecycle,
    PostgresRecordStore, ProcessingWorker, RecordStore, S3CredentialIssuer, SimulatedStrategy,
};

/// Running worker tasks and the handle that stops them from taking new events
enum WorkerRuntime {
    Local {
        stop: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    },
    Kafka {
        consumers: Vec<Arc<PipelineConsumer>>,
        handles: Vec<JoinHandle<()>>,
    },
}

impl WorkerRuntime {
    /// Stop intake of new events; returns the tasks still finishing in-flight work
    fn stop(self) -> Vec<JoinHandle<()>> {
        match self {
            WorkerRuntime::Local { stop, handles } => {
                stop.cancel();
                handles
            }
            WorkerRuntime::Kafka { consumers, handles } => {
                for consumer in &consumers {
                    consumer.shutdown();
                }
                handles
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        store = ?config.database.backend,
        event_bus = ?config.event_bus.backend,
        "Starting upload service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store: Arc<dyn RecordStore> = match config.database.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory record store; records do not survive a restart");
            Arc::new(InMemoryRecordStore::new())
        }
        StoreBackend::Postgres => {
            let store = PostgresRecordStore::connect(&config.database)
                .await
                .context("Failed to initialize record store")?;
            if config.database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Arc::new(store)
        }
    };

    let issuer: Arc<dyn CredentialIssuer> = Arc::new(S3CredentialIssuer::new(&config.s3).await);

    let processing_cancel = CancellationToken::new();
    let worker = Arc::new(ProcessingWorker::new(
        Lifecycle::new(store.clone(), config.store_timeout()),
        Arc::new(SimulatedStrategy::new(
            config.processing_delay(),
            config.result_url_base(),
        )),
        processing_cancel.clone(),
    ));

    let (publisher, runtime) = start_event_bus(&config, worker)?;

    let api_state = AppState {
        intake: IntakeService::new(
            issuer,
            store.clone(),
            config.issuer_timeout(),
            config.store_timeout(),
        )
        .with_max_upload_bytes(config.api.max_upload_bytes),
        confirmation: ConfirmationService::new(store.clone(), publisher, config.store_timeout()),
        store,
        store_timeout: config.store_timeout(),
    };

    // Spawn API server task
    let api_shutdown = CancellationToken::new();
    let api_handle = {
        let api_config = config.api.clone();
        let stopped = api_shutdown.clone();
        tokio::spawn(async move {
            let shutdown = async move { stopped.cancelled().await };
            if let Err(e) = start_api_server(api_state, &api_config, shutdown).await {
                error!(error = %e, "API server error");
            }
        })
    };

    info!("Upload service started successfully");

    shutdown_signal().await;

    info!("Shutting down upload service");

    api_shutdown.cancel();
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed");
    }

    let mut handles = runtime.stop();
    let grace = config.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while let Some(handle) = handles.last_mut() {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
            handles.pop();
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            grace_secs = grace.as_secs(),
            remaining = handles.len(),
            "Shutdown grace elapsed; cancelling in-flight processing"
        );
        processing_cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
    }

    info!("Upload service stopped");

    Ok(())
}

/// Wire the configured event bus to the worker
fn start_event_bus(
    config: &Config,
    worker: Arc<ProcessingWorker>,
) -> Result<(Arc<dyn EventPublisher>, WorkerRuntime)> {
    match config.event_bus.backend {
        BusBackend::Memory => {
            let (bus, events) = InMemoryEventBus::new();
            let stop = CancellationToken::new();
            let handle = {
                let stop = stop.clone();
                tokio::spawn(async move { worker.run_local(events, stop).await })
            };

            Ok((
                Arc::new(bus),
                WorkerRuntime::Local {
                    stop,
                    handles: vec![handle],
                },
            ))
        }
        BusBackend::Kafka => {
            let producer = PipelineProducer::new(config.kafka.clone())
                .context("Failed to initialize Kafka producer")?;
            let publisher = KafkaEventPublisher::new(Arc::new(producer));

            let mut consumers = Vec::with_capacity(config.worker.consumers);
            let mut handles = Vec::with_capacity(config.worker.consumers);

            for index in 0..config.worker.consumers {
                let consumer = ConsumerBuilder::from_config(config.kafka.clone())
                    .client_id(format!("{}-worker-{index}", config.kafka.client_id))
                    .build()
                    .context("Failed to initialize Kafka consumer")?;
                consumer
                    .subscribe_processing()
                    .context("Failed to subscribe to processing topic")?;

                let consumer = Arc::new(consumer);
                let handler = worker.clone();
                let running = consumer.clone();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = running.run(handler).await {
                        error!(error = %e, consumer = index, "Kafka consumer error");
                    }
                }));
                consumers.push(consumer);
            }

            info!(
                topic = %publisher.topic(),
                consumers = consumers.len(),
                "Kafka event bus started"
            );

            Ok((Arc::new(publisher), WorkerRuntime::Kafka { consumers, handles }))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
