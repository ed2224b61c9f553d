//! Client for the external recording-storage service.
//!
//! Sessions recorded by the hosted capture pipeline are not pushed to our
//! ingest endpoint; their raw events live upstream as a manifest of sources
//! (inline payloads, legacy chunks, range-addressable chunks). The
//! `RecordingSource` trait is the seam the reconstructor fetches through.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::RemoteConfig;

// ============================================================================
// RecordingSource trait
// ============================================================================

#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// List every fragment the upstream holds for a session.
    async fn manifest(&self, session_id: &str) -> Result<Manifest, RemoteError>;

    /// Fetch the range-addressable chunks `start_key..=end_key` as NDJSON text.
    async fn chunk_range(
        &self,
        session_id: &str,
        start_key: i64,
        end_key: i64,
    ) -> Result<String, RemoteError>;

    /// Fetch one legacy chunk as JSON.
    async fn chunk(&self, session_id: &str, key: i64) -> Result<Value, RemoteError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

impl RemoteError {
    /// Network failures, 429 and 5xx are worth another attempt; other API errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http(e) => !e.is_decode(),
            RemoteError::Api { code, .. } => *code == 429 || *code >= 500,
            RemoteError::InvalidManifest(_) => false,
        }
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// One fragment listed by the manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ManifestSource {
    /// Legacy chunk, one key per request.
    Chunk { key: i64 },
    /// Range-addressable chunk.
    ChunkV2 { key: i64 },
    /// Payload embedded in the manifest itself.
    Inline { data: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub sources: Vec<ManifestSource>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    sources: Vec<Value>,
}

impl Manifest {
    /// Decode a manifest body. Entries of an unknown kind are skipped.
    pub fn from_value(value: Value) -> Result<Self, RemoteError> {
        let raw: RawManifest = serde_json::from_value(value)
            .map_err(|e| RemoteError::InvalidManifest(e.to_string()))?;

        let mut sources = Vec::with_capacity(raw.sources.len());
        for entry in raw.sources {
            match serde_json::from_value::<ManifestSource>(entry) {
                Ok(source) => sources.push(source),
                Err(e) => tracing::debug!(error = %e, "Skipping unrecognised manifest source"),
            }
        }
        Ok(Self { sources })
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn chunk_v2_keys(&self) -> Vec<i64> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                ManifestSource::ChunkV2 { key } => Some(*key),
                _ => None,
            })
            .collect()
    }

    pub fn legacy_keys(&self) -> Vec<i64> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                ManifestSource::Chunk { key } => Some(*key),
                _ => None,
            })
            .collect()
    }

    pub fn inline_payloads(&self) -> impl Iterator<Item = &Value> {
        self.sources.iter().filter_map(|s| match s {
            ManifestSource::Inline { data } => Some(data),
            _ => None,
        })
    }
}

// ============================================================================
// HttpRecordingClient
// ============================================================================

/// Recording-storage client over HTTP.
///
/// Routes, relative to `base_url`:
/// - `GET /sessions/{id}/manifest`
/// - `GET /sessions/{id}/chunks?start={k}&end={k}` (NDJSON)
/// - `GET /sessions/{id}/chunks/{key}` (JSON)
#[derive(Debug, Clone)]
pub struct HttpRecordingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpRecordingClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &RemoteConfig, base_url: String) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn manifest_once(&self, session_id: &str) -> Result<Manifest, RemoteError> {
        let url = format!("{}/sessions/{}/manifest", self.base_url, session_id);
        let response = self.get(&url).send().await?;
        let status = response.status();

        // Upstream answers 404 for sessions it never recorded.
        if status == StatusCode::NOT_FOUND {
            return Ok(Manifest::default());
        }
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }

        let body: Value = response.json().await?;
        Manifest::from_value(body)
    }
}

fn api_error(status: StatusCode, body: String) -> RemoteError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    tracing::error!(code = status.as_u16(), message = %message, "Recording storage API error");
    RemoteError::Api {
        code: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RecordingSource for HttpRecordingClient {
    async fn manifest(&self, session_id: &str) -> Result<Manifest, RemoteError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.manifest_once(session_id),
            |e: &RemoteError| e.is_transient(),
        )
        .await
    }

    async fn chunk_range(
        &self,
        session_id: &str,
        start_key: i64,
        end_key: i64,
    ) -> Result<String, RemoteError> {
        let url = format!(
            "{}/sessions/{}/chunks?start={}&end={}",
            self.base_url, session_id, start_key, end_key
        );
        let response = self.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.text().await?)
    }

    async fn chunk(&self, session_id: &str, key: i64) -> Result<Value, RemoteError> {
        let url = format!("{}/sessions/{}/chunks/{}", self.base_url, session_id, key);
        let response = self.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// TESTS
// ============================================================================
