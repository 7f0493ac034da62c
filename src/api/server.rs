//! API Server Module
//!
//! This module implements the HTTP endpoint for transaction submission.
//! Submitted transactions are decoded and handed to the batch coordinator;
//! the response only says whether the transaction was admitted.
//!
//! # Routes
//! - `POST /submit`: JSON transaction body, 204 on admission
//! - `GET /status`: chain tip and coordinator phase
//! - `GET /blocks/:height`: a committed block

use crate::{
    CoordinatorError, Transaction,
    batch::{BatchCoordinator, CoordinatorStatus},
    config::ApiConfig,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ethers::types::H256;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

/// Shared application state that is accessible across all request handlers
#[derive(Clone)]
pub struct AppState {
    coordinator: BatchCoordinator,
}

/// The main API server struct
///
/// Encapsulates the listen address and the coordinator requests are served against.
pub struct Server {
    config: ApiConfig,
    coordinator: BatchCoordinator,
}

impl Server {
    /// Creates a new API server instance
    ///
    /// # Arguments
    /// * `config` - Listen address settings
    /// * `coordinator` - Batch coordinator submitted transactions are admitted to
    pub fn new(config: ApiConfig, coordinator: BatchCoordinator) -> Self {
        Self { config, coordinator }
    }

    /// Starts the API server and begins listening for incoming requests
    ///
    /// # Returns
    /// `Ok(())` when the server stops, or an error if binding fails
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router(self.coordinator);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Build the router serving all routes against `coordinator`
pub fn router(coordinator: BatchCoordinator) -> Router {
    Router::new()
        .route("/submit", post(handle_submit))
        .route("/status", get(handle_status))
        .route("/blocks/:height", get(handle_block))
        .with_state(AppState { coordinator })
}

/// Error response: status code plus a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        let status = match &e {
            CoordinatorError::Admission(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Initialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::Halted(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Handles `POST /submit`
///
/// 1. Decodes the body into a transaction (400 on failure, coordinator untouched)
/// 2. Admits it to the open batch
/// 3. Answers 204 with no body on admission
async fn handle_submit(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let tx = Transaction::from_json(&body).map_err(|e| {
        warn!("Rejected submission: {}", e);
        ApiError::new(StatusCode::BAD_REQUEST, format!("parsing request body: {e}"))
    })?;

    match state.coordinator.admit(tx).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            match &e {
                CoordinatorError::Admission(_) => warn!("{}", e),
                _ => error!("{}", e),
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    height: Option<u64>,
    tip: Option<H256>,
    blocks_published: u64,
    coordinator: CoordinatorStatus,
}

/// Handles `GET /status`
async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let chain = state.coordinator.ledger().current_state().await.map_err(|e| {
        error!("Reading chain state: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(StatusResponse {
        height: chain.height(),
        tip: chain.header.as_ref().map(|h| h.id()),
        blocks_published: state.coordinator.feed().written(),
        coordinator: state.coordinator.status(),
    }))
}

/// Handles `GET /blocks/:height`
async fn handle_block(
    State(state): State<AppState>,
    Path(height): Path<u64>,
) -> Result<Response, ApiError> {
    let block = state.coordinator.ledger().block_at(height).await.map_err(|e| {
        error!("Reading block {}: {}", height, e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    match block {
        Some(block) => Ok(Json(block).into_response()),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no block at height {height}"),
        )),
    }
}
