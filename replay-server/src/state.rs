use std::sync::Arc;

use replay_core::config::StorageBackend;
use replay_core::{HttpRecordingClient, RecordingSource, ReplayConfig};
use replay_ingest::{MemorySessionStore, PgSessionStore, SessionStore};

use crate::subsystems::reconstruct::ReconstructOptions;

/// Shared state for the HTTP and IPC surfaces.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    /// Upstream recording storage; `None` when `remote.enabled` is off.
    pub remote: Option<Arc<dyn RecordingSource>>,
    pub config: ReplayConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SessionStore>,
        remote: Option<Arc<dyn RecordingSource>>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config,
        }
    }

    /// Connect the configured store and upstream client.
    pub async fn from_config(config: ReplayConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn SessionStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let pool = replay_core::db::create_pool(&config.database).await?;
                replay_core::db::ensure_schema(&pool).await?;
                Arc::new(PgSessionStore::new(pool))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory session store; recordings are lost on restart");
                Arc::new(MemorySessionStore::new())
            }
        };

        let remote: Option<Arc<dyn RecordingSource>> = if config.remote.enabled {
            let client = HttpRecordingClient::new(&config.remote)?;
            tracing::info!("Upstream recording storage at {}", config.remote.base_url);
            Some(Arc::new(client))
        } else {
            None
        };

        tracing::info!("Session store backend: {}", store.name());
        Ok(Self::new(store, remote, config))
    }

    pub fn reconstruct_options(&self) -> ReconstructOptions {
        ReconstructOptions::from(&self.config.remote)
    }

    pub fn remote(&self) -> Option<&dyn RecordingSource> {
        self.remote.as_deref()
    }
}
