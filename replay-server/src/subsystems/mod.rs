pub mod analysis;
pub mod ingest;
pub mod playback;
pub mod reconstruct;
pub mod sanitize;
