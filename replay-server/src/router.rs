use crate::state::AppState;
use crate::subsystems::{ingest, playback};
use replay_core::ipc::{ReplayRequest, ReplayResponse};

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

pub async fn handle_request(request: ReplayRequest, state: &AppState) -> ReplayResponse {
    match request {
        ReplayRequest::Ping => ReplayResponse::pong(),
        ReplayRequest::Health => match state.store.health().await {
            Ok(backend) => ReplayResponse::ok(serde_json::json!({
                "store": state.store.name(),
                "backend": backend,
                "remote": state.remote.is_some(),
                "status": "healthy"
            })),
            Err(e) => ReplayResponse::err(format!("Store health check failed: {}", e)),
        },
        ReplayRequest::Ingest { payload } => {
            match ingest::ingest_payload(payload, state.store.as_ref()).await {
                Ok(outcome) => match serde_json::to_value(&outcome) {
                    Ok(data) => ReplayResponse::ok(data),
                    Err(e) => ReplayResponse::err(e.to_string()),
                },
                Err(e) => ReplayResponse::err(e.to_string()),
            }
        }
        ReplayRequest::Get { session_id } => {
            match state.store.get_by_session_id(&session_id).await {
                Ok(Some(session)) => match serde_json::to_value(&session) {
                    Ok(data) => ReplayResponse::ok(data),
                    Err(e) => ReplayResponse::err(e.to_string()),
                },
                Ok(None) => ReplayResponse::err(format!("Session not found: {}", session_id)),
                Err(e) => ReplayResponse::err(e.to_string()),
            }
        }
        ReplayRequest::List { limit, offset } => {
            let limit = clamp_limit(limit);
            match state.store.list(limit, offset.unwrap_or(0)).await {
                Ok(sessions) => ReplayResponse::ok(serde_json::json!({
                    "count": sessions.len(),
                    "sessions": sessions,
                })),
                Err(e) => ReplayResponse::err(e.to_string()),
            }
        }
        ReplayRequest::Replay { session_id } => {
            let options = state.reconstruct_options();
            match playback::load_replay(state.store.as_ref(), state.remote(), &options, &session_id)
                .await
            {
                Ok(outcome) => match serde_json::to_value(&outcome) {
                    Ok(data) => ReplayResponse::ok(data),
                    Err(e) => ReplayResponse::err(e.to_string()),
                },
                Err(e) => ReplayResponse::err(e.to_string()),
            }
        }
    }
}

/// Page size for listings, defaulted and capped.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}
