//! Capture side of the recording pipeline.
//!
//! Events are queued by the [`Batcher`], which flushes on a size threshold,
//! a periodic timer, or a page lifecycle signal, and hands each batch to the
//! [`Transport`]. A batch that no channel accepts goes back on the front of
//! the queue and rides along with the next flush.

pub mod batcher;
pub mod context;
pub mod transport;

pub use batcher::{Batcher, BatcherOptions, FlushOutcome, LifecycleSignal};
pub use context::{SessionContext, SessionState};
pub use transport::{BeaconChannel, DeliveryChannel, DeliveryError, HttpChannel, Transport};
