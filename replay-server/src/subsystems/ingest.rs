use replay_core::models::event::accept_events;
use replay_core::SessionMetadata;
use replay_ingest::{IngestAck, SessionStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Missing 'sessionId'")]
    MissingSessionId,

    #[error("'events' must be an array")]
    InvalidEvents,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// True when the caller sent something unusable, as opposed to a storage failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, IngestError::MissingSessionId | IngestError::InvalidEvents)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    #[serde(flatten)]
    pub ack: IngestAck,
    /// Events rejected by validation and not stored.
    pub dropped: usize,
}

/// Store one capture delivery, creating the session record on first contact.
///
/// Individual malformed events are dropped; the rest of the batch is kept.
pub async fn ingest_payload(
    payload: Value,
    store: &dyn SessionStore,
) -> Result<IngestOutcome, IngestError> {
    let session_id = session_id(&payload)?;
    let (events, dropped) = events(&payload)?;
    let metadata = metadata(&payload).with_classification();

    if dropped > 0 {
        tracing::warn!(session_id = %session_id, dropped, "Dropped malformed events from batch");
    }

    let ack = store.create(&session_id, events, &metadata).await?;
    tracing::debug!(
        session_id = %session_id,
        appended = ack.appended,
        total = ack.event_count,
        "Stored batch"
    );
    Ok(IngestOutcome { ack, dropped })
}

/// Append events to a session that must already exist.
pub async fn append_events(
    session_id: &str,
    body: Value,
    store: &dyn SessionStore,
) -> Result<IngestOutcome, IngestError> {
    // Accept either a bare array or `{events: [...]}`.
    let (events, dropped) = match body {
        Value::Array(items) => accept_events(items),
        other => events(&other)?,
    };

    let ack = store.append(session_id, events).await?;
    Ok(IngestOutcome { ack, dropped })
}

fn session_id(payload: &Value) -> Result<String, IngestError> {
    payload["sessionId"]
        .as_str()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(IngestError::MissingSessionId)
}

fn events(payload: &Value) -> Result<(Vec<replay_core::Event>, usize), IngestError> {
    match &payload["events"] {
        Value::Array(items) => Ok(accept_events(items.clone())),
        Value::Null => Ok((Vec::new(), 0)),
        _ => Err(IngestError::InvalidEvents),
    }
}

fn metadata(payload: &Value) -> SessionMetadata {
    match &payload["metadata"] {
        Value::Null => SessionMetadata::default(),
        raw => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring unreadable session metadata");
            SessionMetadata::default()
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use replay_ingest::MemorySessionStore;
    use serde_json::json;

    fn batch(session_id: &str, range: std::ops::Range<i64>) -> Value {
        json!({
            "sessionId": session_id,
            "events": range.map(|ts| json!({"type": 3, "timestamp": ts, "data": {"source": 2}})).collect::<Vec<_>>(),
            "metadata": {
                "startTime": 1_700_000_000_000i64,
                "userAgent": "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
                "screenWidth": 1920,
                "screenHeight": 1080,
                "pageUrl": "https://example.com/"
            }
        })
    }

    #[tokio::test]
    async fn test_first_batch_creates_then_appends() {
        let store = MemorySessionStore::new();

        let first = ingest_payload(batch("abc", 0..3), &store).await.unwrap();
        let second = ingest_payload(batch("abc", 3..5), &store).await.unwrap();

        assert!(first.ack.created);
        assert!(!second.ack.created);
        assert_eq!(second.ack.event_count, 5);

        let session = store.get_by_session_id("abc").await.unwrap().unwrap();
        assert_eq!(session.browser.as_deref(), Some("Chrome"));
        assert_eq!(session.os.as_deref(), Some("Windows"));
        assert_eq!(session.device_type.as_deref(), Some("desktop"));
    }

    #[tokio::test]
    async fn test_missing_session_id_is_rejected() {
        let store = MemorySessionStore::new();
        let err = ingest_payload(json!({"events": []}), &store).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingSessionId));
        assert!(err.is_client_error());

        let err = ingest_payload(json!({"sessionId": "  ", "events": []}), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingSessionId));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_events_are_dropped_individually() {
        let store = MemorySessionStore::new();
        let payload = json!({
            "sessionId": "abc",
            "events": [
                {"type": 4, "timestamp": 1, "data": {}},
                {"type": "x"},
                "nonsense",
                {"type": 2, "timestamp": 2, "data": {"node": {"id": 1, "type": 0}}}
            ]
        });

        let outcome = ingest_payload(payload, &store).await.unwrap();
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.ack.event_count, 2);
    }

    #[tokio::test]
    async fn test_unreadable_metadata_does_not_lose_events() {
        let store = MemorySessionStore::new();
        let payload = json!({
            "sessionId": "abc",
            "events": [{"type": 4, "timestamp": 1}],
            "metadata": {"screenWidth": "wide"}
        });
        let outcome = ingest_payload(payload, &store).await.unwrap();
        assert_eq!(outcome.ack.event_count, 1);
    }

    #[tokio::test]
    async fn test_append_requires_existing_session() {
        let store = MemorySessionStore::new();
        let err = append_events("ghost", json!([{"type": 3, "timestamp": 1}]), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::NotFound(_))));

        ingest_payload(batch("abc", 0..1), &store).await.unwrap();
        let outcome = append_events("abc", json!({"events": [{"type": 3, "timestamp": 9}]}), &store)
            .await
            .unwrap();
        assert_eq!(outcome.ack.event_count, 2);
    }
}
