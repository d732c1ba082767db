//! HTTP control plane of one process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::broadcast::{ProcessId, UrbMessage};
use crate::common::error::ApiError;
use crate::detector::FailureDetector;
use crate::resolver::Resolver;

#[derive(Clone)]
pub struct ApiState {
    pub resolver: Arc<Resolver>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub id: ProcessId,
    pub trusted: Vec<ProcessId>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct LaunchClientRequest {
    #[serde(rename = "reqCount")]
    pub req_count: i64,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/client/launch", post(launch_client_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn index_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(IndexResponse {
        id: state.resolver.id(),
        trusted: state.resolver.trusted().into_iter().collect(),
    })
}

/// Admission can block for a long time, so the broadcast runs detached.
async fn broadcast_handler(
    State(state): State<ApiState>,
    Json(request): Json<BroadcastRequest>,
) -> impl IntoResponse {
    let resolver = state.resolver;
    tokio::spawn(async move {
        resolver.broadcast(UrbMessage::new(request.text)).await;
    });
    StatusCode::ACCEPTED
}

/// Starts a client issuing `reqCount` broadcasts one after another.
async fn launch_client_handler(
    State(state): State<ApiState>,
    Json(request): Json<LaunchClientRequest>,
) -> impl IntoResponse {
    let resolver = state.resolver;
    let id = resolver.id();
    info!(process = id, requests = request.req_count, "Launching client");

    tokio::spawn(async move {
        for i in 0..request.req_count.max(0) {
            resolver.broadcast(UrbMessage::new(format!("Message {}_{}", id, i))).await;
        }
        info!(process = id, "Client finished");
    });
    StatusCode::ACCEPTED
}

async fn snapshot_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.resolver.snapshot().await)
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.resolver.metrics().encode() {
        Ok((content_type, buffer)) => ([(header::CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn serve(addr: SocketAddr, state: ApiState) -> Result<(), ApiError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ApiError::Bind { addr, source })?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
