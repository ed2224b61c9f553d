//! Sanitizer: makes a stream safe to hand to a player.
//!
//! - Payloads that arrive gzip-compressed are inflated and re-parsed.
//! - Snapshot and mutation node trees are validated; any node without a
//!   numeric `id` and `type` is removed with its subtree.
//! - A full snapshot whose root is invalid is dropped from the stream.
//!
//! Streams without any full snapshot are reported as incomplete.

use flate2::read::GzDecoder;
use replay_core::{DomNode, Event, EventType, ReplayError};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;

/// Leading byte of a gzip stream.
const GZIP_MAGIC: u8 = 0x1f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Playability {
    Ready,
    /// No full snapshot: a player would have nothing to apply increments to.
    Incomplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeReport {
    pub decompressed: usize,
    pub decompress_failed: usize,
    pub nodes_pruned: usize,
    pub snapshots_dropped: usize,
    pub adds_dropped: usize,
}

pub fn sanitize(events: Vec<Event>) -> (Vec<Event>, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let mut out = Vec::with_capacity(events.len());

    for mut event in events {
        if is_gzip(&event.data) {
            match decompress(&event.data) {
                Ok(data) => {
                    event.data = data;
                    report.decompressed += 1;
                }
                Err(e) => {
                    report.decompress_failed += 1;
                    tracing::warn!(
                        timestamp = event.timestamp,
                        error = %e,
                        "Payload looked compressed but could not be inflated, leaving as-is"
                    );
                }
            }
        }

        if let Some(event) = repair_nodes(event, &mut report) {
            out.push(event);
        }
    }

    if report.nodes_pruned > 0 || report.snapshots_dropped > 0 || report.adds_dropped > 0 {
        tracing::warn!(report = ?report, "Removed invalid DOM nodes from stream");
    }
    (out, report)
}

pub fn playability(events: &[Event]) -> Playability {
    if events.iter().any(Event::is_full_snapshot) {
        Playability::Ready
    } else {
        Playability::Incomplete
    }
}

// ============================================================================
// Compression
// ============================================================================

/// True when a payload is binary (a latin-1 string or a byte array) whose
/// first byte is the gzip marker.
pub fn is_gzip(data: &Value) -> bool {
    match data {
        Value::String(s) => s.chars().next() == Some(char::from(GZIP_MAGIC)),
        Value::Array(items) => items.first().and_then(Value::as_u64) == Some(GZIP_MAGIC as u64),
        _ => false,
    }
}

/// Inflate a compressed payload and parse the result as JSON.
pub fn decompress(data: &Value) -> Result<Value, ReplayError> {
    let bytes = payload_bytes(data)?;
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated)?;
    Ok(serde_json::from_slice(&inflated)?)
}

fn payload_bytes(data: &Value) -> Result<Vec<u8>, ReplayError> {
    match data {
        Value::String(s) => s
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .map_err(|_| ReplayError::NotBinary(format!("char {:?} is outside latin-1", c)))
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| ReplayError::NotBinary(format!("{} is not a byte", v)))
            })
            .collect(),
        other => Err(ReplayError::NotBinary(format!(
            "expected string or byte array, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Node repair
// ============================================================================

fn repair_nodes(mut event: Event, report: &mut SanitizeReport) -> Option<Event> {
    match event.kind {
        EventType::FullSnapshot => {
            let root = event
                .data
                .get("node")
                .and_then(|node| DomNode::prune(node, &mut report.nodes_pruned));
            match root {
                Some(node) => {
                    if let Value::Object(data) = &mut event.data {
                        data.insert("node".to_string(), node.into_value());
                    }
                    Some(event)
                }
                None => {
                    report.snapshots_dropped += 1;
                    tracing::warn!(timestamp = event.timestamp, "Dropping full snapshot with invalid root node");
                    None
                }
            }
        }
        EventType::IncrementalSnapshot if event.is_mutation() => {
            if let Some(Value::Array(adds)) = event.data.get_mut("adds") {
                adds.retain_mut(|add| {
                    let node = add
                        .get("node")
                        .and_then(|n| DomNode::prune(n, &mut report.nodes_pruned));
                    match (node, add.as_object_mut()) {
                        (Some(node), Some(add)) => {
                            add.insert("node".to_string(), node.into_value());
                            true
                        }
                        _ => {
                            report.adds_dropped += 1;
                            false
                        }
                    }
                });
            }
            Some(event)
        }
        _ => Some(event),
    }
}

// ============================================================================
// TESTS
// ============================================================================
