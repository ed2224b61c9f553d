use std::sync::Arc;

use axum::http::StatusCode;
use replay_core::config::RemoteConfig;
use replay_core::{HttpRecordingClient, RecordingSource, ReplayConfig};
use replay_ingest::MemorySessionStore;
use replay_server::http::replay_inner;
use replay_server::subsystems::reconstruct::{reconstruct, ReconstructOptions};
use replay_server::AppState;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_config() -> RemoteConfig {
    RemoteConfig {
        enabled: true,
        max_retries: 1,
        retry_delay_ms: 5,
        ..Default::default()
    }
}

fn state(server: &MockServer) -> AppState {
    let client = HttpRecordingClient::with_base_url(&remote_config(), server.uri()).unwrap();
    let mut config = ReplayConfig::default();
    config.remote = remote_config();
    AppState::new(
        Arc::new(MemorySessionStore::new()),
        Some(Arc::new(client) as Arc<dyn RecordingSource>),
        config,
    )
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_reconstructs_from_windows_and_legacy_chunks() {
    let server = MockServer::start().await;

    let mut sources: Vec<serde_json::Value> = (1..=25)
        .map(|k| json!({"source": "chunk_v2", "key": k}))
        .collect();
    sources.push(json!({"source": "chunk", "key": 100}));
    sources.push(json!({"source": "inline", "data": [{"type": 4, "timestamp": 1, "data": {"href": "https://example.com"}}]}));

    Mock::given(method("GET"))
        .and(path("/sessions/s1/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sources": sources})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sessions/s1/chunks"))
        .and(query_param("start", "1"))
        .and(query_param("end", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!(["w1", {"type": 2, "timestamp": 10, "data": {"node": {"id": 1, "type": 0}}}]),
            json!({"type": "x"}),
            json!({"windowId": "w1", "data": [{"type": 3, "timestamp": 30, "data": {"source": 2}}]}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sessions/s1/chunks"))
        .and(query_param("start", "21"))
        .and(query_param("end", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!({"type": 3, "timestamp": 20, "data": {"source": 1}}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sessions/s1/chunks/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "w2": [{"type": 3, "timestamp": 15, "data": {"source": 5}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpRecordingClient::with_base_url(&remote_config(), server.uri()).unwrap();
    let recon = reconstruct(&client, "s1", &ReconstructOptions::default())
        .await
        .unwrap();

    let timestamps: Vec<i64> = recon.events.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![1, 10, 15, 20, 30]);
    assert_eq!(recon.stats.windows_requested, 2);
    assert_eq!(recon.stats.lines_dropped, 1);
    assert_eq!(recon.events[2].window_id.as_deref(), Some("w2"));
}

#[tokio::test]
async fn test_replay_reports_failed_when_manifest_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s2/manifest"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden"})))
        .mount(&server)
        .await;

    let (status, body) = replay_inner(&state(&server), "s2").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("forbidden"));
}

#[tokio::test]
async fn test_replay_without_upstream_recording() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s3/manifest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (status, body) = replay_inner(&state(&server), "s3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_recording");
    assert!(body["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_window_still_replays() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s4/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sources": [
            {"source": "chunk_v2", "key": 1},
            {"source": "chunk", "key": 2}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/s4/chunks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/s4/chunks/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"type": 3, "timestamp": 5, "data": {"source": 2}}
        ])))
        .mount(&server)
        .await;

    let (status, body) = replay_inner(&state(&server), "s4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "incomplete");
    assert_eq!(body["stats"]["reconstruction"]["windowsFailed"], 1);
}
