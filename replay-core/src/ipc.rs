use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayRequest {
    Ping,
    Health,
    Ingest {
        payload: serde_json::Value,
    },
    Get {
        session_id: String,
    },
    List {
        limit: Option<u32>,
        offset: Option<u32>,
    },
    Replay {
        session_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplayResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl ReplayResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let req: ReplayRequest =
            serde_json::from_value(serde_json::json!({"action": "replay", "session_id": "abc"}))
                .unwrap();
        match req {
            ReplayRequest::Replay { session_id } => assert_eq!(session_id, "abc"),
            other => panic!("Unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ReplayResponse::err("boom");
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("boom"));
        assert!(resp.data.is_none());
    }
}
