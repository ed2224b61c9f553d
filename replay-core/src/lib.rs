pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod remote;

pub use config::ReplayConfig;
pub use error::ReplayError;
pub use models::event::{Event, EventType};
pub use models::node::DomNode;
pub use models::session::{
    AnalysisResult, IngestPayload, RecordingSession, SessionMetadata, SessionSummary,
};
pub use remote::{
    HttpRecordingClient, Manifest, ManifestSource, RecordingSource, RemoteError,
};
