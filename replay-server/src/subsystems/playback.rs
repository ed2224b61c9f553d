//! Playback assembly: stored events plus upstream fragments, merged,
//! sanitized and classified for the player.

use replay_core::{Event, RecordingSource, RemoteError, SessionSummary};
use replay_ingest::{SessionStore, StoreError};
use serde::Serialize;
use thiserror::Error;

use super::reconstruct::{finalize_stream, reconstruct, ReconstructOptions, ReconstructionStats};
use super::sanitize::{playability, sanitize, Playability, SanitizeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Ready,
    NoRecording,
    Incomplete,
}

impl ReplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStatus::Ready => "ready",
            ReplayStatus::NoRecording => "no_recording",
            ReplayStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] RemoteError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStats {
    pub stored_events: usize,
    pub duplicates_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconstruction: Option<ReconstructionStats>,
    /// Set when the upstream fetch failed and only stored events were used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
    pub sanitize: SanitizeReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub status: ReplayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    pub events: Vec<Event>,
    pub stats: ReplayStats,
}

/// Build the playable stream for a session.
///
/// With no upstream configured, a session unknown to the store is
/// `NotFound`. With an upstream, an unknown session that also has no
/// upstream fragments is `NoRecording`. A manifest failure is fatal unless
/// the store holds a record, which is then played alone with the failure
/// reported in `stats.upstreamError`.
pub async fn load_replay(
    store: &dyn SessionStore,
    remote: Option<&dyn RecordingSource>,
    options: &ReconstructOptions,
    session_id: &str,
) -> Result<ReplayOutcome, PlaybackError> {
    let record = store.get_by_session_id(session_id).await?;

    let (session, mut events) = match record {
        Some(record) => (Some(record.summary()), record.events),
        None => (None, Vec::new()),
    };
    let stored_events = events.len();

    let mut upstream_error = None;
    let reconstruction = match remote {
        Some(source) => match reconstruct(source, session_id, options).await {
            Ok(recon) => {
                events.extend(recon.events);
                Some(recon.stats)
            }
            Err(e) if session.is_some() => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Upstream fetch failed, playing stored events only"
                );
                upstream_error = Some(e.to_string());
                None
            }
            Err(e) => return Err(PlaybackError::Fetch(e)),
        },
        None if session.is_none() => return Err(PlaybackError::NotFound(session_id.to_string())),
        None => None,
    };

    let (events, sanitize_report) = sanitize(events);
    let (events, duplicates_removed) = finalize_stream(events);

    let status = if events.is_empty() {
        ReplayStatus::NoRecording
    } else {
        match playability(&events) {
            Playability::Ready => ReplayStatus::Ready,
            Playability::Incomplete => ReplayStatus::Incomplete,
        }
    };

    tracing::info!(
        session_id = %session_id,
        status = status.as_str(),
        events = events.len(),
        "Assembled replay"
    );

    Ok(ReplayOutcome {
        status,
        session,
        events,
        stats: ReplayStats {
            stored_events,
            duplicates_removed,
            reconstruction,
            upstream_error,
            sanitize: sanitize_report,
        },
    })
}

// ============================================================================
// TESTS
// ============================================================================
