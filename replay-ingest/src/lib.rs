//! Ingest & merge store for recorded sessions.
//!
//! `SessionStore` is the seam; `PgSessionStore` is the production backend and
//! `MemorySessionStore` serves tests and single-node development.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;
pub use store::{IngestAck, SessionStore, StoreError};
