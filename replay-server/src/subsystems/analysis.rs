//! Hand-off to the external analysis collaborator.
//!
//! The collaborator pulls a cleaned event stream with session context and
//! posts back an `AnalysisResult`, which is stored on the record.

use replay_core::{AnalysisResult, Event, SessionSummary};
use replay_ingest::{SessionStore, StoreError};
use serde::Serialize;

use super::reconstruct::finalize_stream;
use super::sanitize::sanitize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisInput {
    pub session: SessionSummary,
    pub events: Vec<Event>,
}

/// Stored events for a session, sanitized and in timestamp order.
pub async fn analysis_input(
    store: &dyn SessionStore,
    session_id: &str,
) -> Result<Option<AnalysisInput>, StoreError> {
    let Some(record) = store.get_by_session_id(session_id).await? else {
        return Ok(None);
    };

    let session = record.summary();
    let (events, _) = sanitize(record.events);
    let (events, _) = finalize_stream(events);
    Ok(Some(AnalysisInput { session, events }))
}

pub async fn attach_analysis(
    store: &dyn SessionStore,
    session_id: &str,
    analysis: &AnalysisResult,
) -> Result<(), StoreError> {
    store.save_analysis(session_id, analysis).await?;
    store.mark_analyzed(session_id).await?;
    tracing::info!(
        session_id = %session_id,
        sentiment = %analysis.sentiment,
        engagement = analysis.engagement_score,
        "Attached analysis"
    );
    Ok(())
}
