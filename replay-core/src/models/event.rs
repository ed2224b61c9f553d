use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recorded event kinds, numbered as the capture library emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventType {
    DomContentLoaded,
    Load,
    FullSnapshot,
    IncrementalSnapshot,
    Meta,
    Custom,
    Plugin,
}

impl From<EventType> for u8 {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::DomContentLoaded => 0,
            EventType::Load => 1,
            EventType::FullSnapshot => 2,
            EventType::IncrementalSnapshot => 3,
            EventType::Meta => 4,
            EventType::Custom => 5,
            EventType::Plugin => 6,
        }
    }
}

impl TryFrom<u8> for EventType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::DomContentLoaded),
            1 => Ok(EventType::Load),
            2 => Ok(EventType::FullSnapshot),
            3 => Ok(EventType::IncrementalSnapshot),
            4 => Ok(EventType::Meta),
            5 => Ok(EventType::Custom),
            6 => Ok(EventType::Plugin),
            other => Err(format!("unknown event type {}", other)),
        }
    }
}

/// `data.source` value of an incremental event that carries DOM mutations.
pub const MUTATION_SOURCE: i64 = 0;

/// One recorded UI event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub timestamp: i64,
    #[serde(default)]
    pub data: Value,
    /// Browsing context the event came from, when the upstream multiplexes windows.
    #[serde(rename = "windowId", default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventType, timestamp: i64, data: Value) -> Self {
        Self {
            kind,
            timestamp,
            data,
            window_id: None,
            extra: Map::new(),
        }
    }

    /// Validate an untrusted JSON value as an event.
    ///
    /// Returns `None` unless `type` is an integer in `0..=6` and `timestamp`
    /// is numeric.
    pub fn from_value(value: Value) -> Option<Event> {
        let Value::Object(mut obj) = value else {
            return None;
        };

        let kind = obj
            .get("type")
            .and_then(integer)
            .and_then(|t| u8::try_from(t).ok())
            .and_then(|t| EventType::try_from(t).ok())?;
        let timestamp = obj.get("timestamp").and_then(timestamp_millis)?;

        obj.remove("type");
        obj.remove("timestamp");
        let data = obj.remove("data").unwrap_or(Value::Null);
        let window_id = obj.remove("windowId").and_then(|w| window_key(&w));

        Some(Event {
            kind,
            timestamp,
            data,
            window_id,
            extra: obj,
        })
    }

    pub fn with_window(mut self, window_id: Option<String>) -> Self {
        if self.window_id.is_none() {
            self.window_id = window_id;
        }
        self
    }

    pub fn is_full_snapshot(&self) -> bool {
        self.kind == EventType::FullSnapshot
    }

    /// True for incremental events whose payload adds or removes DOM nodes.
    pub fn is_mutation(&self) -> bool {
        self.kind == EventType::IncrementalSnapshot
            && self.data.get("source").and_then(integer) == Some(MUTATION_SOURCE)
    }
}

/// Integral JSON number, accepting floats with no fractional part.
pub fn integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Some(f as i64)
        }
        _ => None,
    }
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Some(f.trunc() as i64),
        _ => None,
    }
}

/// Normalise a window identifier (string or number) to its string form.
pub fn window_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate a list of untrusted values, returning the accepted events and
/// how many were dropped.
pub fn accept_events(values: Vec<Value>) -> (Vec<Event>, usize) {
    let total = values.len();
    let events: Vec<Event> = values.into_iter().filter_map(Event::from_value).collect();
    let dropped = total - events.len();
    (events, dropped)
}
