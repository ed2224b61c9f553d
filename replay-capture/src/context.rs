//! Session identity for the capture side.
//!
//! A browsing session gets one id, minted on the first `begin()` and reused
//! by every later `begin()` until `end()` is called (logout). Re-running
//! initialization therefore never changes the id.

use chrono::{DateTime, Utc};
use replay_core::SessionMetadata;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active {
        session_id: Uuid,
        started_at: DateTime<Utc>,
    },
    Ended {
        session_id: Uuid,
    },
}

#[derive(Debug)]
pub struct SessionContext {
    state: RwLock<SessionState>,
    /// Client context sent with every batch (user agent, screen, page).
    metadata: SessionMetadata,
}

impl SessionContext {
    pub fn new(metadata: SessionMetadata) -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            metadata: metadata.with_classification(),
        }
    }

    /// Start the session, or return the id of the one already active.
    pub fn begin(&self) -> Uuid {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SessionState::Active { session_id, .. } => session_id,
            SessionState::Idle | SessionState::Ended { .. } => {
                let session_id = Uuid::new_v4();
                *state = SessionState::Active {
                    session_id,
                    started_at: Utc::now(),
                };
                tracing::info!(session_id = %session_id, "Recording session started");
                session_id
            }
        }
    }

    /// End the active session. The next `begin()` mints a fresh id.
    pub fn end(&self) -> Option<Uuid> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SessionState::Active { session_id, .. } => {
                *state = SessionState::Ended { session_id };
                tracing::info!(session_id = %session_id, "Recording session ended");
                Some(session_id)
            }
            _ => None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the active session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self.state() {
            SessionState::Active { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Metadata for the next batch, stamped with the session start time.
    pub fn metadata(&self) -> SessionMetadata {
        let mut metadata = self.metadata.clone();
        if let SessionState::Active { started_at, .. } = self.state() {
            metadata.start_time.get_or_insert(started_at.timestamp_millis());
        }
        metadata
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(SessionMetadata::default())
    }
}
