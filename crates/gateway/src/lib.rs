//! HTTP gateway for IA Hub.
//!
//! Routes:
//! - `GET  /health` — liveness
//! - `POST /webhook` — one WhatsApp message in, one reply out
//! - `POST /api/embeddings/{business_phone_id}` — ingest documents for a tenant
//! - `GET  /api/embeddings/{business_phone_id}` — list a tenant's documents
//!
//! Built on Axum.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::{
    Router,
    routing::{get, post},
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use iahub_config::GatewayConfig;
use iahub_core::error::{Error, ErrorKind};
use iahub_core::message::TenantId;
use iahub_core::store::Document;
use iahub_pipeline::{DocumentIngestor, MessagePipeline, PipelineStage};

/// Header Meta signs webhook bodies with.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: Arc<MessagePipeline>,
    pub ingestor: Arc<DocumentIngestor>,
    /// When set, every webhook must carry a valid `X-Hub-Signature-256`.
    pub app_secret: Option<String>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .route(
            "/api/embeddings/{business_phone_id}",
            post(add_documents_handler).get(list_documents_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until `shutdown` resolves.
pub async fn start(
    config: &GatewayConfig,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Errors ---

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<PipelineStage>,
}

/// An error on its way out as an HTTP response.
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorResponse {
                error: "unauthorized",
                retryable: false,
                stage: None,
            },
        }
    }

    /// Only the classification leaves the process; the error text stays in
    /// the logs.
    fn from_error(err: &Error, stage: Option<PipelineStage>) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            body: ErrorResponse {
                error: kind.as_str(),
                retryable: err.is_retryable(),
                stage,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for each error classification.
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Generation => StatusCode::BAD_GATEWAY,
        ErrorKind::Retrieval | ErrorKind::Persistence => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct IgnoredResponse {
    status: &'static str,
}

async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.app_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                warn!("Webhook rejected: missing signature");
                ApiError::unauthorized()
            })?;
        iahub_channels::verify_signature(secret, &body, header).map_err(|e| {
            warn!(error = %e, "Webhook rejected: signature mismatch");
            ApiError::unauthorized()
        })?;
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Webhook rejected: body is not JSON");
        ApiError::from_error(
            &Error::config(format!("invalid JSON body: {e}")),
            Some(PipelineStage::Received),
        )
    })?;

    if iahub_channels::is_status_update(&payload) {
        info!("Status update ignored");
        return Ok(Json(IgnoredResponse { status: "ignored" }).into_response());
    }

    match state.pipeline.process_payload(&payload).await {
        Ok(outbound) => Ok(Json(outbound).into_response()),
        Err(failure) => {
            error!(
                stage = %failure.stage,
                kind = failure.kind().as_str(),
                error = %failure.error,
                "Message processing failed"
            );
            Err(ApiError::from_error(&failure.error, Some(failure.stage)))
        }
    }
}

#[derive(Serialize)]
struct AddDocumentsResponse {
    ids: Vec<String>,
}

async fn add_documents_handler(
    State(state): State<SharedState>,
    Path(business_phone_id): Path<String>,
    Json(contents): Json<Vec<String>>,
) -> Result<Json<AddDocumentsResponse>, ApiError> {
    let tenant = TenantId::new(business_phone_id);
    let ids = state
        .ingestor
        .ingest(&tenant, contents)
        .await
        .map_err(|e| {
            error!(tenant = %tenant, error = %e, "Failed to add documents");
            ApiError::from_error(&e, None)
        })?;
    Ok(Json(AddDocumentsResponse { ids }))
}

async fn list_documents_handler(
    State(state): State<SharedState>,
    Path(business_phone_id): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let tenant = TenantId::new(business_phone_id);
    let documents = state.ingestor.list(&tenant).await.map_err(|e| {
        error!(tenant = %tenant, error = %e, "Failed to list documents");
        ApiError::from_error(&e, None)
    })?;
    Ok(Json(documents))
}
