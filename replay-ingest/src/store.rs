use async_trait::async_trait;
use replay_core::{AnalysisResult, Event, RecordingSession, SessionMetadata, SessionSummary};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Acknowledgement returned for every stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub session_id: String,
    /// True when this call created the record.
    pub created: bool,
    /// Events appended by this call.
    pub appended: usize,
    /// Events stored for the session after this call.
    pub event_count: usize,
    pub duration_ms: i64,
}

/// Per-session event store.
///
/// Writes for one session id are applied atomically: a concurrent `create`
/// and `append` for the same id never observe or produce a torn event list.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the record, or append to it when it already exists.
    async fn create(
        &self,
        session_id: &str,
        events: Vec<Event>,
        metadata: &SessionMetadata,
    ) -> Result<IngestAck, StoreError>;

    /// Append to an existing record. Fails with `NotFound` on first contact.
    async fn append(&self, session_id: &str, events: Vec<Event>) -> Result<IngestAck, StoreError>;

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<RecordingSession>, StoreError>;

    /// Newest sessions first.
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<SessionSummary>, StoreError>;

    async fn save_analysis(
        &self,
        session_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<(), StoreError>;

    async fn mark_analyzed(&self, session_id: &str) -> Result<(), StoreError>;

    /// Backend version / liveness string.
    async fn health(&self) -> Result<String, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
