use std::sync::Arc;

use replay_capture::{Batcher, BatcherOptions, FlushOutcome, SessionContext, Transport};
use replay_core::config::CaptureConfig;
use replay_core::{Event, EventType, SessionMetadata};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn capture_config(server: &MockServer, batch_size: usize) -> CaptureConfig {
    CaptureConfig {
        endpoint: format!("{}/ingest", server.uri()),
        batch_size,
        ..Default::default()
    }
}

fn batcher(config: &CaptureConfig) -> Arc<Batcher> {
    let context = SessionContext::new(SessionMetadata {
        page_url: Some("https://shop.example.com/".into()),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/121.0".into()),
        ..Default::default()
    });
    Arc::new(Batcher::new(
        Transport::from_config(config).unwrap(),
        Arc::new(context),
        BatcherOptions::from(config),
    ))
}

async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_threshold_batches_reach_ingest_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let config = capture_config(&server, 50);
    let batcher = batcher(&config);
    let (lifecycle, _rx) = broadcast::channel(4);
    let session_id = batcher.init(&lifecycle);

    for ts in 0..120 {
        batcher
            .record(Event::new(EventType::IncrementalSnapshot, ts, json!({"source": 2})))
            .await;
    }
    assert_eq!(batcher.teardown().await, FlushOutcome::Sent(20));

    let bodies = received_bodies(&server).await;
    assert_eq!(bodies.len(), 3);
    let sizes: Vec<usize> = bodies
        .iter()
        .map(|b| b["events"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![50, 50, 20]);

    for body in &bodies {
        assert_eq!(body["sessionId"], session_id.to_string());
        assert_eq!(body["metadata"]["browser"], "Firefox");
        assert_eq!(body["metadata"]["pageUrl"], "https://shop.example.com/");
    }
}

#[tokio::test]
async fn test_server_error_keeps_events_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = capture_config(&server, 50);
    let batcher = batcher(&config);
    batcher.context().begin();

    batcher
        .record(Event::new(EventType::Meta, 1, json!({"href": "https://shop.example.com/"})))
        .await;
    assert_eq!(batcher.flush().await, FlushOutcome::Requeued(1));
    assert_eq!(batcher.pending().await, 1);

    assert_eq!(batcher.flush().await, FlushOutcome::Sent(1));
    let bodies = received_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["events"], bodies[1]["events"]);
}
