//! Loopback-only admin HTTP surface.
//!
//! Exposes the running configuration and the ingest path for staging
//! endpoints. Any peer that is not 127.0.0.1/::1 receives 401; there is no
//! further authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Settings;
use crate::models::NewTmpEndpoint;
use crate::repository::RecordStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub settings: Arc<Settings>,
}

/// Build the admin router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(get_config))
        .route("/api/tmp_endpoints", post(create_tmp_endpoint))
        .layer(middleware::from_fn(require_loopback))
        .with_state(state)
}

/// Serve the admin API until the process exits.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("JSHunter server started on port {}", port);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn require_loopback(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !addr.ip().is_loopback() {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "target": state.settings.target,
        "storage_dir": state.settings.storage_dir,
    }))
}

/// Ingest wire format: `url` is required; `body` is the raw HTML used for
/// structural-hash deduplication.
#[derive(Debug, Deserialize)]
struct IngestRequest {
    url: String,
    #[serde(default)]
    query_string: String,
    #[serde(default)]
    request_headers: Value,
    #[serde(default)]
    body: String,
}

async fn create_tmp_endpoint(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Response {
    if request.url.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "url is required"})))
            .into_response();
    }

    let created = state
        .store
        .create_tmp_endpoint(NewTmpEndpoint {
            url: request.url,
            query_string: request.query_string,
            request_headers: request.request_headers,
            tmp_body: request.body,
        })
        .await;

    match created {
        Ok(record) => (StatusCode::OK, Json(json!({"id": record.id}))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
