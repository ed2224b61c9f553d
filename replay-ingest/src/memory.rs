//! In-process session store.
//!
//! Each session lives behind its own mutex, so writes to one session are
//! serialized while different sessions proceed independently. The outer map
//! lock is only held long enough to find or insert the entry.

use async_trait::async_trait;
use chrono::Utc;
use replay_core::{AnalysisResult, Event, RecordingSession, SessionMetadata, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::store::{IngestAck, SessionStore, StoreError};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<RecordingSession>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, session_id: &str) -> Option<Arc<Mutex<RecordingSession>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn ack(session: &RecordingSession, created: bool, appended: usize) -> IngestAck {
    IngestAck {
        session_id: session.session_id.clone(),
        created,
        appended,
        event_count: session.events.len(),
        duration_ms: session.duration_ms,
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        session_id: &str,
        events: Vec<Event>,
        metadata: &SessionMetadata,
    ) -> Result<IngestAck, StoreError> {
        let appended = events.len();
        let existing = {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get(session_id).cloned() {
                entry
            } else {
                let session = RecordingSession::new(session_id, events, metadata, Utc::now());
                let result = ack(&session, true, appended);
                sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session)));
                tracing::info!(session_id = %session_id, events = appended, "Created recording session");
                return Ok(result);
            }
        };

        let mut session = existing.lock().await;
        session.append(events, Utc::now());
        Ok(ack(&session, false, appended))
    }

    async fn append(&self, session_id: &str, events: Vec<Event>) -> Result<IngestAck, StoreError> {
        let entry = self
            .entry(session_id)
            .await
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        let appended = events.len();
        let mut session = entry.lock().await;
        session.append(events, Utc::now());
        Ok(ack(&session, false, appended))
    }

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<RecordingSession>, StoreError> {
        match self.entry(session_id).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<SessionSummary>, StoreError> {
        let entries: Vec<_> = self.sessions.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.lock().await.summary());
        }
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(summaries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn save_analysis(
        &self,
        session_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<(), StoreError> {
        let entry = self
            .entry(session_id)
            .await
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        entry.lock().await.analysis = Some(analysis.clone());
        Ok(())
    }

    async fn mark_analyzed(&self, session_id: &str) -> Result<(), StoreError> {
        let entry = self
            .entry(session_id)
            .await
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        entry.lock().await.analyzed = true;
        Ok(())
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(format!("memory ({} sessions)", self.len().await))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================
