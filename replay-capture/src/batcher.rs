use replay_core::config::CaptureConfig;
use replay_core::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::transport::Transport;

/// Page lifecycle moments after which the page may never run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    VisibilityHidden,
    PageHide,
    BeforeUnload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// No active session; events stay queued.
    Held(usize),
    Sent(usize),
    /// Delivery failed; the batch is back at the front of the queue.
    Requeued(usize),
}

#[derive(Debug, Clone)]
pub struct BatcherOptions {
    /// Queue length that triggers an immediate flush.
    pub threshold: usize,
    pub flush_interval: Duration,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for BatcherOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            threshold: config.batch_size.max(1),
            flush_interval: Duration::from_secs(config.flush_interval_seconds.max(1)),
        }
    }
}

/// Background flush tasks of one `init`, stopped together.
struct Workers {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Batcher {
    queue: Mutex<VecDeque<Event>>,
    transport: Transport,
    context: Arc<SessionContext>,
    options: BatcherOptions,
    initialized: AtomicBool,
    workers: std::sync::Mutex<Option<Workers>>,
}

impl Batcher {
    pub fn new(transport: Transport, context: Arc<SessionContext>, options: BatcherOptions) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            transport,
            context,
            options,
            initialized: AtomicBool::new(false),
            workers: std::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Start the session and install the flush timer and lifecycle listener.
    ///
    /// Safe to call repeatedly: later calls return the same session id and
    /// install nothing.
    pub fn init(self: &Arc<Self>, lifecycle: &broadcast::Sender<LifecycleSignal>) -> Uuid {
        let session_id = self.context.begin();
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!(session_id = %session_id, "Batcher already initialized");
            return session_id;
        }

        let (shutdown, _) = broadcast::channel(1);
        let timer = spawn_timer(
            Arc::downgrade(self),
            self.options.flush_interval,
            shutdown.subscribe(),
        );
        let listener = spawn_lifecycle_listener(
            Arc::downgrade(self),
            lifecycle.subscribe(),
            shutdown.subscribe(),
        );

        *self.workers.lock().unwrap_or_else(PoisonError::into_inner) = Some(Workers {
            shutdown,
            handles: vec![timer, listener],
        });

        tracing::info!(
            session_id = %session_id,
            threshold = self.options.threshold,
            interval_ms = self.options.flush_interval.as_millis() as u64,
            "Batcher initialized"
        );
        session_id
    }

    /// Queue an event, flushing at once when the threshold is reached.
    pub async fn record(&self, event: Event) -> Option<FlushOutcome> {
        let reached = {
            let mut queue = self.queue.lock().await;
            queue.push_back(event);
            queue.len() >= self.options.threshold
        };

        if reached {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Drain the whole queue into one batch and hand it to the transport.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(session_id) = self.context.session_id() else {
            let held = self.pending().await;
            if held == 0 {
                return FlushOutcome::Empty;
            }
            tracing::debug!(held, "No active session, holding events");
            return FlushOutcome::Held(held);
        };

        let batch: Vec<Event> = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return FlushOutcome::Empty;
            }
            queue.drain(..).collect()
        };
        let size = batch.len();

        match self
            .transport
            .send(session_id, &batch, &self.context.metadata())
            .await
        {
            Ok(()) => {
                tracing::debug!(session_id = %session_id, events = size, "Batch delivered");
                FlushOutcome::Sent(size)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    events = size,
                    error = %e,
                    "Batch delivery failed, re-queued for next flush"
                );
                let mut queue = self.queue.lock().await;
                for event in batch.into_iter().rev() {
                    queue.push_front(event);
                }
                FlushOutcome::Requeued(size)
            }
        }
    }

    /// Stop the timer and listener, flush what is left and end the session.
    ///
    /// A flush already running in a background task is awaited, so its batch
    /// is either delivered or back on the queue before the final flush.
    pub async fn teardown(&self) -> FlushOutcome {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(workers) = workers {
            let _ = workers.shutdown.send(());
            for handle in workers.handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Batcher task ended abnormally");
                }
            }
        }
        self.initialized.store(false, Ordering::SeqCst);

        let outcome = self.flush().await;
        self.transport.close().await;
        self.context.end();
        outcome
    }
}

fn spawn_timer(
    batcher: Weak<Batcher>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }
            let Some(batcher) = batcher.upgrade() else {
                break;
            };
            batcher.flush().await;
        }
    })
}

fn spawn_lifecycle_listener(
    batcher: Weak<Batcher>,
    mut signals: broadcast::Receiver<LifecycleSignal>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = signals.recv() => received,
            };
            match received {
                Ok(signal) => tracing::debug!(?signal, "Lifecycle flush"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Lifecycle signals lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            let Some(batcher) = batcher.upgrade() else {
                break;
            };
            batcher.flush().await;
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
