use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use request_policy::FilterVerdict;
use serde::{Deserialize, Serialize};

/// One finished span as written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictRecord>,
}

impl SpanRecord {
    /// A record that starts and ends now, with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            started_at: now,
            ended_at: now,
            attributes: BTreeMap::new(),
            verdict: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_verdict(mut self, verdict: &FilterVerdict) -> Self {
        self.verdict = Some(VerdictRecord::from(verdict));
        self
    }
}

/// Outcome of policy evaluation for the span's request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub blocked: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl From<&FilterVerdict> for VerdictRecord {
    fn from(verdict: &FilterVerdict) -> Self {
        Self {
            blocked: verdict.blocked,
            status: verdict.status.as_u16(),
            reason: verdict.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_verdict_omits_empty_reason() {
        let record = SpanRecord::new("GET /").with_verdict(&FilterVerdict::allow());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["verdict"]["blocked"], false);
        assert_eq!(json["verdict"]["status"], 200);
        assert!(json["verdict"].get("reason").is_none());
    }

    #[test]
    fn record_without_verdict_omits_field() {
        let record = SpanRecord::new("POST /login").with_attribute("http.request.body", "{}");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("verdict"));
        let back: SpanRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
