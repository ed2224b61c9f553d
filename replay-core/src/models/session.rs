use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::device::{classify, DeviceInfo};
use super::event::Event;

/// Client-reported context sent alongside every batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Session start in epoch milliseconds.
    pub start_time: Option<i64>,
    pub user_agent: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub page_url: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

impl SessionMetadata {
    /// Fill device/browser/OS from the user agent where the client left them out.
    pub fn with_classification(mut self) -> Self {
        if let Some(ua) = self.user_agent.as_deref() {
            let DeviceInfo {
                device_type,
                browser,
                os,
            } = classify(ua);
            self.device_type
                .get_or_insert_with(|| device_type.as_str().to_string());
            self.browser.get_or_insert(browser);
            self.os.get_or_insert(os);
        }
        self
    }

    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Body of one capture delivery: `{sessionId, events, metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPayload {
    pub session_id: String,
    pub events: Vec<Event>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// Output of the external analysis collaborator, attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub overview: String,
    pub user_intent: String,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub sentiment: String,
    pub engagement_score: f64,
}

/// The accumulated record for one recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub page_url: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub events: Vec<Event>,
    pub analysis: Option<AnalysisResult>,
    pub analyzed: bool,
}

impl RecordingSession {
    /// A fresh record seeded with the first batch and first-seen metadata.
    pub fn new(
        session_id: impl Into<String>,
        events: Vec<Event>,
        metadata: &SessionMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        let start_time = metadata.start_time_utc().unwrap_or(now);
        Self {
            session_id: session_id.into(),
            start_time,
            end_time: now,
            duration_ms: (now - start_time).num_milliseconds().max(0),
            page_url: metadata.page_url.clone(),
            user_agent: metadata.user_agent.clone(),
            device_type: metadata.device_type.clone(),
            browser: metadata.browser.clone(),
            os: metadata.os.clone(),
            screen_width: metadata.screen_width,
            screen_height: metadata.screen_height,
            events,
            analysis: None,
            analyzed: false,
        }
    }

    /// Concatenate a batch and move the end of the session to `now`.
    pub fn append(&mut self, events: Vec<Event>, now: DateTime<Utc>) {
        self.events.extend(events);
        self.end_time = now;
        self.duration_ms = (now - self.start_time).num_milliseconds().max(0);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: self.duration_ms,
            page_url: self.page_url.clone(),
            device_type: self.device_type.clone(),
            browser: self.browser.clone(),
            os: self.os.clone(),
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            event_count: self.events.len(),
            analyzed: self.analyzed,
        }
    }
}

/// Session metadata without the event list, for listings and analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub page_url: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub event_count: usize,
    pub analyzed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventType;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_append_recomputes_duration() {
        let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let metadata = SessionMetadata {
            start_time: Some(1_700_000_000_000),
            ..Default::default()
        };
        let mut session = RecordingSession::new(
            "abc",
            vec![Event::new(EventType::Meta, 1, json!({}))],
            &metadata,
            start + Duration::seconds(1),
        );
        assert_eq!(session.duration_ms, 1_000);

        session.append(
            vec![Event::new(EventType::FullSnapshot, 2, json!({}))],
            start + Duration::seconds(5),
        );
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.duration_ms, 5_000);
        assert_eq!(session.end_time, start + Duration::seconds(5));
    }

    #[test]
    fn test_classification_fills_missing_fields_only() {
        let metadata = SessionMetadata {
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".into()),
            browser: Some("Custom".into()),
            ..Default::default()
        }
        .with_classification();
        assert_eq!(metadata.browser.as_deref(), Some("Custom"));
        assert_eq!(metadata.os.as_deref(), Some("Linux"));
        assert_eq!(metadata.device_type.as_deref(), Some("desktop"));
    }

    #[test]
    fn test_payload_wire_shape_is_camel_case() {
        let payload = IngestPayload {
            session_id: "s-1".into(),
            events: vec![Event::new(EventType::Load, 5, json!({}))],
            metadata: SessionMetadata {
                page_url: Some("https://example.com".into()),
                screen_width: Some(1280),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["metadata"]["pageUrl"], "https://example.com");
        assert_eq!(value["metadata"]["screenWidth"], 1280);
        assert_eq!(value["events"][0]["type"], 1);
    }
}
