//! Replay HTTP API
//!
//! Axum server carrying the capture ingest endpoint and the read side used by
//! the player and the analysis collaborator. Runs alongside the Unix socket
//! IPC server on port 8766 (configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, Value)`, so the logic is testable without dispatch.
//!
//! Endpoints:
//! - GET   /health                  : store health
//! - GET   /version                 : server version info
//! - POST  /ingest                  : create-or-append a capture batch
//! - GET   /sessions                : newest sessions first (`limit`, `offset`)
//! - GET   /sessions/:id            : one stored record
//! - PATCH /sessions/:id/events     : append to an existing record
//! - GET   /sessions/:id/replay     : merged, sanitized playback stream
//! - GET   /sessions/:id/analysis   : analysis input
//! - POST  /sessions/:id/analysis   : attach an analysis result

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use replay_core::AnalysisResult;
use replay_ingest::StoreError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::router::clamp_limit;
use crate::state::AppState;
use crate::subsystems::{analysis, ingest, playback};

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.http.cors_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/ingest", post(ingest_handler))
        .route("/sessions", get(list_handler))
        .route("/sessions/:id", get(session_handler))
        .route("/sessions/:id/events", patch(append_handler))
        .route("/sessions/:id/replay", get(replay_handler))
        .route(
            "/sessions/:id/analysis",
            get(analysis_input_handler).post(attach_analysis_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Capture scripts post from the recorded site's origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(Any);

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}: {}", o, e);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Replay HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn error_body(msg: impl ToString) -> Value {
    json!({
        "error": msg.to_string(),
        "status": "error",
    })
}

fn store_error(e: StoreError) -> (StatusCode, Value) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, error_body(e)),
        other => {
            tracing::error!("Store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(other))
        }
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(state: &AppState) -> (StatusCode, Value) {
    match state.store.health().await {
        Ok(backend) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": state.store.name(),
                "backend": backend,
                "remote": state.remote.is_some(),
                "socket": state.config.service.socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "replay/1",
    })
}

pub async fn ingest_inner(state: &AppState, payload: Value) -> (StatusCode, Value) {
    match ingest::ingest_payload(payload, state.store.as_ref()).await {
        Ok(outcome) => {
            let (status, mut body) = to_body(&outcome);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("status".to_string(), json!("ok"));
            }
            (status, body)
        }
        Err(ingest::IngestError::Store(e)) => store_error(e),
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e)),
    }
}

pub async fn append_inner(state: &AppState, session_id: &str, body: Value) -> (StatusCode, Value) {
    match ingest::append_events(session_id, body, state.store.as_ref()).await {
        Ok(outcome) => to_body(&outcome),
        Err(ingest::IngestError::Store(e)) => store_error(e),
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e)),
    }
}

pub async fn list_inner(state: &AppState, query: ListQuery) -> (StatusCode, Value) {
    let limit = clamp_limit(query.limit);
    let offset = query.offset.unwrap_or(0);
    match state.store.list(limit, offset).await {
        Ok(sessions) => (
            StatusCode::OK,
            json!({
                "count": sessions.len(),
                "limit": limit,
                "offset": offset,
                "sessions": sessions,
            }),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn session_inner(state: &AppState, session_id: &str) -> (StatusCode, Value) {
    match state.store.get_by_session_id(session_id).await {
        Ok(Some(session)) => to_body(&session),
        Ok(None) => store_error(StoreError::NotFound(session_id.to_string())),
        Err(e) => store_error(e),
    }
}

pub async fn replay_inner(state: &AppState, session_id: &str) -> (StatusCode, Value) {
    let options = state.reconstruct_options();
    match playback::load_replay(state.store.as_ref(), state.remote(), &options, session_id).await {
        Ok(outcome) => to_body(&outcome),
        Err(playback::PlaybackError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            json!({
                "status": "not_found",
                "error": format!("Session not found: {}", id),
            }),
        ),
        Err(playback::PlaybackError::Fetch(e)) => {
            tracing::error!(session_id = %session_id, "Replay reconstruction failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                json!({
                    "status": "failed",
                    "error": e.to_string(),
                }),
            )
        }
        Err(playback::PlaybackError::Store(e)) => {
            tracing::error!(session_id = %session_id, "Replay load failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "status": "failed",
                    "error": e.to_string(),
                }),
            )
        }
    }
}

pub async fn analysis_input_inner(state: &AppState, session_id: &str) -> (StatusCode, Value) {
    match analysis::analysis_input(state.store.as_ref(), session_id).await {
        Ok(Some(input)) => to_body(&input),
        Ok(None) => store_error(StoreError::NotFound(session_id.to_string())),
        Err(e) => store_error(e),
    }
}

pub async fn attach_analysis_inner(
    state: &AppState,
    session_id: &str,
    result: AnalysisResult,
) -> (StatusCode, Value) {
    match analysis::attach_analysis(state.store.as_ref(), session_id, &result).await {
        Ok(()) => (
            StatusCode::OK,
            json!({
                "status": "ok",
                "sessionId": session_id,
                "analyzed": true,
            }),
        ),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let (status, body) = ingest_inner(&state, payload).await;
    (status, Json(body))
}

pub async fn append_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let (status, body) = append_inner(&state, &session_id, body).await;
    (status, Json(body))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let (status, body) = list_inner(&state, query).await;
    (status, Json(body))
}

pub async fn session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state, &session_id).await;
    (status, Json(body))
}

pub async fn replay_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = replay_inner(&state, &session_id).await;
    (status, Json(body))
}

pub async fn analysis_input_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = analysis_input_inner(&state, &session_id).await;
    (status, Json(body))
}

pub async fn attach_analysis_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(result): Json<AnalysisResult>,
) -> impl IntoResponse {
    let (status, body) = attach_analysis_inner(&state, &session_id, result).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::ReplayConfig;
    use replay_ingest::MemorySessionStore;

    fn state() -> AppState {
        AppState::new(Arc::new(MemorySessionStore::new()), None, ReplayConfig::default())
    }

    fn batch(session_id: &str) -> Value {
        json!({
            "sessionId": session_id,
            "events": [
                {"type": 4, "timestamp": 1000, "data": {"href": "https://example.com", "width": 1280, "height": 720}},
                {"type": 2, "timestamp": 1001, "data": {"node": {"id": 1, "type": 0, "childNodes": []}}},
                {"type": 3, "timestamp": 1500, "data": {"source": 2, "type": 2, "id": 1, "x": 10, "y": 20}}
            ],
            "metadata": {"pageUrl": "https://example.com", "screenWidth": 1280, "screenHeight": 720}
        })
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["protocol"], "replay/1");
    }

    #[tokio::test]
    async fn test_health_inner_reports_store() {
        let (status, body) = health_inner(&state()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_ingest_inner_creates_session() {
        let state = state();
        let (status, body) = ingest_inner(&state, batch("abc")).await;
        assert_eq!(status, StatusCode::OK, "{:?}", body);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["created"], true);
        assert_eq!(body["eventCount"], 3);
        assert_eq!(body["dropped"], 0);
    }

    #[tokio::test]
    async fn test_ingest_inner_missing_session_id_is_400() {
        let (status, body) = ingest_inner(&state(), json!({"events": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("sessionId"));
    }

    #[tokio::test]
    async fn test_append_inner_unknown_session_is_404() {
        let (status, _) = append_inner(&state(), "ghost", json!([])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_and_list_inner() {
        let state = state();
        ingest_inner(&state, batch("a")).await;
        ingest_inner(&state, batch("b")).await;

        let (status, body) = session_inner(&state, "a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], "a");
        assert_eq!(body["events"].as_array().unwrap().len(), 3);

        let (status, body) = list_inner(&state, ListQuery { limit: Some(1), offset: None }).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, _) = session_inner(&state, "missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replay_inner_statuses() {
        let state = state();
        ingest_inner(&state, batch("full")).await;
        ingest_inner(
            &state,
            json!({"sessionId": "partial", "events": [{"type": 3, "timestamp": 5, "data": {"source": 1}}]}),
        )
        .await;

        let (status, body) = replay_inner(&state, "full").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        let (status, body) = replay_inner(&state, "partial").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "incomplete");

        let (status, body) = replay_inner(&state, "ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "not_found");
    }

    #[tokio::test]
    async fn test_analysis_round_trip() {
        let state = state();
        ingest_inner(&state, batch("abc")).await;

        let (status, body) = analysis_input_inner(&state, "abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["sessionId"], "abc");
        assert_eq!(body["events"].as_array().unwrap().len(), 3);

        let result = AnalysisResult {
            overview: "Scrolled the landing page".into(),
            engagement_score: 0.5,
            ..Default::default()
        };
        let (status, _) = attach_analysis_inner(&state, "abc", result.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = attach_analysis_inner(&state, "missing", result).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = session_inner(&state, "abc").await;
        assert_eq!(body["analyzed"], true);
    }
}
