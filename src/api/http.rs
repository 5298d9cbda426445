//! HTTP API Server
//!
//! Client-facing file reads and uploads, plus cluster listing and status.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::FileMeshConfig;
use crate::error::{Error, Result};
use crate::membership::MembershipClient;
use crate::network::max_file_size;
use crate::replication::ReplicationCoordinator;

/// Shared application state
pub struct AppState {
    /// Replication coordinator serving reads and writes
    pub coordinator: Arc<ReplicationCoordinator>,
    /// Membership client, for status
    pub membership: Arc<MembershipClient>,
}

/// HTTP API server
pub struct HttpServer {
    enabled: bool,
    bind_address: String,
    body_limit: usize,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: &FileMeshConfig, state: Arc<AppState>) -> Self {
        Self {
            enabled: config.api.enabled,
            bind_address: config.api_bind_address(),
            body_limit: max_file_size(config.max_frame_bytes()),
            state,
        }
    }

    /// Create the router
    pub(crate) fn create_router(state: Arc<AppState>, body_limit: usize) -> Router {
        Router::new()
            // Files
            .route(
                "/file/:name",
                get(handle_get_file).post(handle_put_file).put(handle_put_file),
            )
            .route("/files", get(handle_files))
            // Status and info
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the API listener; `None` when the API is disabled
    pub async fn bind(&self) -> Result<Option<TcpListener>> {
        if !self.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(None);
        }

        let listener = TcpListener::bind(&self.bind_address).await.map_err(|e| {
            Error::Network(format!("failed to bind HTTP API on {}: {}", self.bind_address, e))
        })?;
        tracing::info!("HTTP API listening on {}", self.bind_address);
        Ok(Some(listener))
    }

    /// Serve requests on a bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = Self::create_router(self.state, self.body_limit);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// File listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node: String,
    pub membership: String,
    pub peer_count: usize,
    pub peers: Vec<PeerStatus>,
}

/// A known peer as reported by `/status`
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerStatus {
    pub address: String,
    /// When the latest membership snapshot listed this peer
    pub last_contact: DateTime<Utc>,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Maps core errors onto HTTP status codes
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::InvalidFilename(_) => (StatusCode::BAD_REQUEST, "INVALID_FILENAME"),
            Error::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::FetchTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "FETCH_TIMEOUT"),
            Error::PeerUnreachable { .. } => (StatusCode::BAD_GATEWAY, "PEER_UNREACHABLE"),
            Error::FetchFailed { .. } => (StatusCode::BAD_GATEWAY, "FETCH_FAILED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if self.0.is_retryable() {
            tracing::warn!("Request failed: {}", self.0);
        } else if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// ============ Handlers ============

async fn handle_get_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let data = state.coordinator.get_file(&name).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

async fn handle_put_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> std::result::Result<StatusCode, ApiError> {
    state.coordinator.put_file(&name, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_files(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<FilesResponse>, ApiError> {
    let files = state.coordinator.cluster_index().await?;
    Ok(Json(FilesResponse {
        files: files.into_iter().collect(),
    }))
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let directory = state.membership.directory();
    let peers: Vec<PeerStatus> = directory
        .entries()
        .await
        .into_iter()
        .map(|(address, liveness)| PeerStatus {
            address: address.to_string(),
            last_contact: liveness.last_contact,
        })
        .collect();

    Json(StatusResponse {
        node: directory.local().to_string(),
        membership: state.membership.state().await.to_string(),
        peer_count: peers.len(),
        peers,
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node: state.membership.directory().local().to_string(),
    })
}
