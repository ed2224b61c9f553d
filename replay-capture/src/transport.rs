//! Delivery of batches to the ingest endpoint.
//!
//! Two kinds of channel sit behind [`DeliveryChannel`]:
//! - [`BeaconChannel`]: fire-and-forget. Accepting the body into its bounded
//!   queue counts as delivered; a background task does the POST.
//! - [`HttpChannel`]: a plain request whose failure reaches the caller.
//!
//! [`Transport::send`] tries the beacon first when one is configured and falls
//! back to the plain request. It never retries; the batcher re-queues.
//! [`Transport::close`] drains the beacon queue before shutdown.

use async_trait::async_trait;
use replay_core::config::CaptureConfig;
use replay_core::{Event, IngestPayload, SessionMetadata};
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ingest rejected batch ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, body: &Value) -> Result<(), DeliveryError>;

    /// Finish outstanding work. Deliveries after `close` may fail.
    async fn close(&self) {}

    /// Channel name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// HttpChannel
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    endpoint: String,
}

impl HttpChannel {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn post(client: &Client, endpoint: &str, body: &Value) -> Result<(), DeliveryError> {
    let response = client.post(endpoint).json(body).send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DeliveryChannel for HttpChannel {
    async fn deliver(&self, body: &Value) -> Result<(), DeliveryError> {
        post(&self.client, &self.endpoint, body).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// BeaconChannel
// ============================================================================

/// Queue-and-forget delivery, the counterpart of a browser beacon.
///
/// Failures of the background POST are logged and not reported back.
pub struct BeaconChannel {
    tx: std::sync::Mutex<Option<mpsc::Sender<Value>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BeaconChannel {
    /// Start the background sender. `capacity` bounds queued bodies.
    pub fn spawn(channel: HttpChannel, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Value>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                if let Err(e) = channel.deliver(&body).await {
                    tracing::warn!(endpoint = %channel.endpoint(), error = %e, "Beacon delivery failed");
                }
            }
        });
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl DeliveryChannel for BeaconChannel {
    async fn deliver(&self, body: &Value) -> Result<(), DeliveryError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(DeliveryError::Unavailable("beacon closed".into()));
        };
        tx.try_send(body.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Unavailable("beacon queue full".into()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Unavailable("beacon closed".into()),
        })
    }

    /// Stop accepting bodies and wait until every queued one has been posted.
    async fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Beacon sender ended abnormally");
            }
        }
    }

    fn name(&self) -> &str {
        "beacon"
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct Transport {
    beacon: Option<Arc<dyn DeliveryChannel>>,
    fallback: Arc<dyn DeliveryChannel>,
}

impl Transport {
    pub fn new(fallback: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            beacon: None,
            fallback,
        }
    }

    pub fn with_beacon(mut self, beacon: Arc<dyn DeliveryChannel>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Plain HTTP delivery to `capture.endpoint`, plus a beacon channel when
    /// `capture.beacon_capacity` is non-zero. Must run inside a tokio runtime.
    pub fn from_config(config: &CaptureConfig) -> Result<Self, DeliveryError> {
        let http = HttpChannel::new(config.endpoint.clone())?;
        let mut transport = Transport::new(Arc::new(http.clone()));
        if config.beacon_capacity > 0 {
            let beacon = BeaconChannel::spawn(http, config.beacon_capacity);
            transport = transport.with_beacon(Arc::new(beacon));
        }
        Ok(transport)
    }

    /// Wire body for one batch: `{sessionId, events, metadata}`.
    pub fn payload(
        session_id: Uuid,
        events: &[Event],
        metadata: &SessionMetadata,
    ) -> Result<Value, DeliveryError> {
        let payload = IngestPayload {
            session_id: session_id.to_string(),
            events: events.to_vec(),
            metadata: metadata.clone(),
        };
        Ok(serde_json::to_value(&payload)?)
    }

    pub async fn send(
        &self,
        session_id: Uuid,
        events: &[Event],
        metadata: &SessionMetadata,
    ) -> Result<(), DeliveryError> {
        let body = Self::payload(session_id, events, metadata)?;

        if let Some(beacon) = &self.beacon {
            match beacon.deliver(&body).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!(channel = beacon.name(), error = %e, "Falling back to plain request"),
            }
        }

        self.fallback.deliver(&body).await
    }

    /// Drain the beacon queue, if any. Later sends use the plain request.
    pub async fn close(&self) {
        if let Some(beacon) = &self.beacon {
            beacon.close().await;
        }
    }
}
