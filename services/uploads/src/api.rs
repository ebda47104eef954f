use crate::config::ApiConfig;
use crate::confirmation::ConfirmationService;
use crate::error::{bounded, UploadError};
use crate::intake::IntakeService;
use crate::model::{NewUpload, UploadDescriptor, UploadRecord, UploadStatus};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub intake: IntakeService,
    pub confirmation: ConfirmationService,
    pub store: Arc<dyn RecordStore>,
    pub store_timeout: Duration,
}

/// Client view of an upload record
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadView {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub storage_key: String,
    pub caption: Option<String>,
    pub status: UploadStatus,
    pub result_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UploadRecord> for UploadView {
    fn from(r: UploadRecord) -> Self {
        Self {
            id: r.id,
            owner_id: r.owner_id,
            file_name: r.file_name,
            storage_key: r.storage_key,
            caption: r.caption,
            status: r.status,
            result_url: r.result_url,
            created_at: r.created_at,
        }
    }
}

/// Body of a 202 confirmation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub id: Uuid,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl UploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            UploadError::IssuerUnavailable(_) | UploadError::PublishFailure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            UploadError::InvalidTransition { .. } | UploadError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            UploadError::StoreFailure(_) | UploadError::ProcessingFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/uploads/initiate", post(initiate_upload))
        .route("/uploads/:id/confirm", post(confirm_upload))
        .route("/uploads/:id", get(get_upload))
        .route("/uploads/owner/:owner_id", get(list_owner_uploads))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ping = bounded(
        state.store_timeout,
        "ping record store",
        UploadError::StoreFailure,
        state.store.ping(),
    )
    .await;

    match ping {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip_all)]
async fn initiate_upload(
    State(state): State<AppState>,
    Json(request): Json<NewUpload>,
) -> Result<Json<UploadDescriptor>, UploadError> {
    state.intake.initiate(request).await.map(Json)
}

#[instrument(skip(state))]
async fn confirm_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ConfirmResponse>), UploadError> {
    let id = parse_upload_id(&id)?;
    let receipt = state.confirmation.confirm(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConfirmResponse {
            id,
            partition: receipt.partition,
            offset: receipt.offset,
        }),
    ))
}

#[instrument(skip(state))]
async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadView>, UploadError> {
    let id = parse_upload_id(&id)?;

    let record = bounded(
        state.store_timeout,
        "fetch upload",
        UploadError::StoreFailure,
        state.store.get(id),
    )
    .await?
    .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

    Ok(Json(record.into()))
}

#[instrument(skip(state))]
async fn list_owner_uploads(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<Json<Vec<UploadView>>, UploadError> {
    let records = bounded(
        state.store_timeout,
        "list uploads",
        UploadError::StoreFailure,
        state.store.list_by_owner(&owner_id),
    )
    .await?;

    Ok(Json(records.into_iter().map(UploadView::from).collect()))
}

/// Ids that are not UUIDs cannot name a record
fn parse_upload_id(raw: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(raw).map_err(|_| UploadError::NotFound(raw.to_string()))
}

/// Serve the API until `shutdown` resolves, then drain in-flight requests
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    info!("Upload API server stopped");
    Ok(())
}
