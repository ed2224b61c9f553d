//! Reconstructor: rebuilds one ordered event stream from upstream fragments
//!
//! Steps:
//! 1. Fetch the session manifest (fatal on failure).
//! 2. Decode inline payloads straight from the manifest.
//! 3. Fetch range-addressable chunks in windows of at most `chunk_window`
//!    keys, and legacy chunks one key at a time, with bounded concurrency.
//!    A failed window or chunk is logged and skipped.
//! 4. Once every fetch has settled, concatenate in key order, sort globally
//!    by timestamp and drop exact duplicates.
//!
//! An empty result is "no recording available", not an error.

use futures::stream::{self, StreamExt};
use replay_core::config::{RemoteConfig, DEFAULT_CHUNK_WINDOW};
use replay_core::models::event::window_key;
use replay_core::{Event, RecordingSource, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ReconstructOptions {
    /// Maximum chunk keys per range request.
    pub chunk_window: usize,
    /// Maximum fetches in flight at once.
    pub max_concurrency: usize,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            chunk_window: DEFAULT_CHUNK_WINDOW,
            max_concurrency: 4,
        }
    }
}

impl From<&RemoteConfig> for ReconstructOptions {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            chunk_window: config.chunk_window.max(1),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

/// Counters describing how complete a reconstruction is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionStats {
    pub sources: usize,
    pub inline_payloads: usize,
    pub windows_requested: usize,
    pub windows_failed: usize,
    pub chunks_requested: usize,
    pub chunks_failed: usize,
    pub lines_dropped: usize,
    pub duplicates_removed: usize,
    pub events_accepted: usize,
}

impl ReconstructionStats {
    /// True when at least one fragment could not be fetched.
    pub fn is_degraded(&self) -> bool {
        self.windows_failed > 0 || self.chunks_failed > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub events: Vec<Event>,
    pub stats: ReconstructionStats,
}

/// Events decoded from one fragment plus the count of entries rejected.
#[derive(Debug, Default)]
pub struct Parsed {
    pub events: Vec<Event>,
    pub dropped: usize,
}

impl Parsed {
    fn absorb(&mut self, other: Parsed) {
        self.events.extend(other.events);
        self.dropped += other.dropped;
    }

    fn push_value(&mut self, value: Value, window: Option<&str>) {
        match Event::from_value(value) {
            Some(event) => self.events.push(event.with_window(window.map(str::to_string))),
            None => self.dropped += 1,
        }
    }
}

// ============================================================================
// Windowing
// ============================================================================

/// Split chunk keys into inclusive `(start, end)` ranges of at most `ceiling` keys.
///
/// Keys are sorted and de-duplicated first.
pub fn chunk_windows(keys: &[i64], ceiling: usize) -> Vec<(i64, i64)> {
    let ceiling = ceiling.max(1);
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    sorted
        .chunks(ceiling)
        .filter_map(|window| Some((*window.first()?, *window.last()?)))
        .collect()
}

// ============================================================================
// Wire shapes
// ============================================================================

/// The shapes one NDJSON line may take, tried in declaration order.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkLine {
    /// `[windowId, event]`
    Windowed(Value, Value),
    /// `{windowId, data: [event, ...]}`
    Grouped {
        #[serde(rename = "windowId", alias = "window_id")]
        window_id: Value,
        data: Vec<Value>,
    },
    /// A bare event object.
    Bare(Value),
}

impl ChunkLine {
    fn into_parsed(self) -> Parsed {
        let mut parsed = Parsed::default();
        match self {
            ChunkLine::Windowed(window, event) => {
                parsed.push_value(event, window_key(&window).as_deref());
            }
            ChunkLine::Grouped { window_id, data } => {
                let window = window_key(&window_id);
                for value in data {
                    parsed.push_value(value, window.as_deref());
                }
            }
            ChunkLine::Bare(value) => parsed.push_value(value, None),
        }
        parsed
    }
}

/// Decode a newline-delimited chunk body. Bad lines are counted, never fatal.
pub fn parse_ndjson(body: &str) -> Parsed {
    let mut parsed = Parsed::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChunkLine>(line) {
            Ok(decoded) => parsed.absorb(decoded.into_parsed()),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable chunk line");
                parsed.dropped += 1;
            }
        }
    }
    parsed
}

/// Decode a JSON fragment: a flat event array, a single event, an object
/// keyed by window id whose values are event arrays, or an NDJSON string.
pub fn parse_json_chunk(value: Value) -> Parsed {
    let mut parsed = Parsed::default();
    match value {
        Value::Array(items) => {
            for item in items {
                parsed.push_value(item, None);
            }
        }
        Value::Object(obj) if obj.contains_key("type") && obj.contains_key("timestamp") => {
            parsed.push_value(Value::Object(obj), None);
        }
        Value::Object(windows) => {
            for (window, items) in windows {
                match items {
                    Value::Array(items) => {
                        for item in items {
                            parsed.push_value(item, Some(&window));
                        }
                    }
                    _ => parsed.dropped += 1,
                }
            }
        }
        Value::String(body) => parsed.absorb(parse_ndjson(&body)),
        _ => parsed.dropped += 1,
    }
    parsed
}

// ============================================================================
// Merge
// ============================================================================

/// Sort by timestamp and remove exact duplicates.
///
/// The sort is stable, so events sharing a timestamp keep their input order.
/// Duplicates are detected by serialized form within each timestamp run.
/// Returns the number of duplicates removed.
pub fn finalize_stream(mut events: Vec<Event>) -> (Vec<Event>, usize) {
    events.sort_by_key(|e| e.timestamp);

    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates = 0;
    for event in events {
        if out.last().map(|last| last.timestamp) != Some(event.timestamp) {
            seen.clear();
        }
        let duplicate = match serde_json::to_string(&event) {
            Ok(key) => !seen.insert(key),
            Err(e) => {
                tracing::debug!(error = %e, "Event not serializable, kept without duplicate check");
                false
            }
        };
        if duplicate {
            duplicates += 1;
            continue;
        }
        out.push(event);
    }
    (out, duplicates)
}

// ============================================================================
// Reconstruction
// ============================================================================

pub async fn reconstruct(
    source: &dyn RecordingSource,
    session_id: &str,
    options: &ReconstructOptions,
) -> Result<Reconstruction, RemoteError> {
    let manifest = source.manifest(session_id).await?;

    let mut stats = ReconstructionStats {
        sources: manifest.sources.len(),
        ..Default::default()
    };
    if manifest.is_empty() {
        tracing::info!(session_id = %session_id, source = source.name(), "No recording available upstream");
        return Ok(Reconstruction {
            events: Vec::new(),
            stats,
        });
    }

    let mut collected = Parsed::default();

    for data in manifest.inline_payloads() {
        stats.inline_payloads += 1;
        collected.absorb(parse_json_chunk(data.clone()));
    }

    // Range-addressable chunks
    let windows = chunk_windows(&manifest.chunk_v2_keys(), options.chunk_window);
    stats.windows_requested = windows.len();

    let mut window_results: Vec<(i64, i64, Result<String, RemoteError>)> = stream::iter(windows)
        .map(|(start, end)| async move {
            (start, end, source.chunk_range(session_id, start, end).await)
        })
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;
    window_results.sort_by_key(|(start, _, _)| *start);

    for (start, end, result) in window_results {
        match result {
            Ok(body) => collected.absorb(parse_ndjson(&body)),
            Err(e) => {
                stats.windows_failed += 1;
                tracing::warn!(
                    session_id = %session_id,
                    start_key = start,
                    end_key = end,
                    error = %e,
                    "Chunk window fetch failed, continuing without it"
                );
            }
        }
    }

    // Legacy chunks, one key per request
    let mut legacy_keys = manifest.legacy_keys();
    legacy_keys.sort_unstable();
    legacy_keys.dedup();
    stats.chunks_requested = legacy_keys.len();

    let mut chunk_results: Vec<(i64, Result<Value, RemoteError>)> = stream::iter(legacy_keys)
        .map(|key| async move { (key, source.chunk(session_id, key).await) })
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;
    chunk_results.sort_by_key(|(key, _)| *key);

    for (key, result) in chunk_results {
        match result {
            Ok(value) => collected.absorb(parse_json_chunk(value)),
            Err(e) => {
                stats.chunks_failed += 1;
                tracing::warn!(
                    session_id = %session_id,
                    key = key,
                    error = %e,
                    "Legacy chunk fetch failed, continuing without it"
                );
            }
        }
    }

    let (events, duplicates) = finalize_stream(collected.events);
    stats.lines_dropped = collected.dropped;
    stats.duplicates_removed = duplicates;
    stats.events_accepted = events.len();

    if stats.is_degraded() {
        tracing::warn!(session_id = %session_id, stats = ?stats, "Reconstruction completed with missing fragments");
    } else {
        tracing::info!(
            session_id = %session_id,
            events = stats.events_accepted,
            dropped = stats.lines_dropped,
            "Reconstruction complete"
        );
    }

    Ok(Reconstruction { events, stats })
}

// ============================================================================
// TESTS
// ============================================================================
