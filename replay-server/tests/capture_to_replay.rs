//! Capture batches delivered over a lossy channel into the ingest path, then
//! replayed from the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replay_capture::{
    Batcher, BatcherOptions, DeliveryChannel, DeliveryError, FlushOutcome, SessionContext,
    Transport,
};
use replay_core::{Event, EventType, SessionMetadata};
use replay_ingest::{MemorySessionStore, SessionStore};
use replay_server::subsystems::ingest::ingest_payload;
use replay_server::subsystems::playback::{load_replay, ReplayStatus};
use replay_server::subsystems::reconstruct::ReconstructOptions;
use serde_json::{json, Value};

/// Rejects every first attempt at a batch, accepts the retry.
struct FlakyIngest {
    store: Arc<MemorySessionStore>,
    attempts: AtomicUsize,
}

#[async_trait]
impl DeliveryChannel for FlakyIngest {
    async fn deliver(&self, body: &Value) -> Result<(), DeliveryError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(DeliveryError::Unavailable("connection reset".into()));
        }
        ingest_payload(body.clone(), self.store.as_ref())
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))
    }

    fn name(&self) -> &str {
        "flaky-ingest"
    }
}

fn recorded_events() -> Vec<Event> {
    let mut events = vec![
        Event::new(EventType::Meta, 0, json!({"href": "https://shop.example.com/", "width": 1280, "height": 720})),
        Event::new(
            EventType::FullSnapshot,
            1,
            json!({"node": {"id": 1, "type": 0, "childNodes": [{"id": 2, "type": 2, "tagName": "html"}]}}),
        ),
    ];
    events.extend((2..60).map(|ts| {
        Event::new(EventType::IncrementalSnapshot, ts, json!({"source": 1, "positions": [{"x": ts, "y": 0}]}))
    }));
    events
}

#[tokio::test]
async fn test_every_event_arrives_despite_one_failure_per_batch() {
    let store = Arc::new(MemorySessionStore::new());
    let channel = Arc::new(FlakyIngest {
        store: store.clone(),
        attempts: AtomicUsize::new(0),
    });
    let context = Arc::new(SessionContext::new(SessionMetadata {
        page_url: Some("https://shop.example.com/".into()),
        ..Default::default()
    }));
    let batcher = Arc::new(Batcher::new(
        Transport::new(channel.clone()),
        context,
        BatcherOptions {
            threshold: 25,
            flush_interval: Duration::from_secs(10),
        },
    ));

    let session_id = batcher.context().begin().to_string();
    for event in recorded_events() {
        batcher.record(event).await;
    }
    loop {
        match batcher.flush().await {
            FlushOutcome::Empty => break,
            FlushOutcome::Sent(_) | FlushOutcome::Requeued(_) => {}
            FlushOutcome::Held(n) => panic!("{} events held without a session", n),
        }
    }

    let record = store.get_by_session_id(&session_id).await.unwrap().unwrap();
    let timestamps: Vec<i64> = record.events.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, (0..60).collect::<Vec<_>>());
    assert_eq!(record.page_url.as_deref(), Some("https://shop.example.com/"));

    let replay = load_replay(store.as_ref(), None, &ReconstructOptions::default(), &session_id)
        .await
        .unwrap();
    assert_eq!(replay.status, ReplayStatus::Ready);
    assert_eq!(replay.events.len(), 60);
}
