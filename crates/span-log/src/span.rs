use std::collections::BTreeMap;

use body_capture::SpanSink;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use request_policy::FilterVerdict;
use uuid::Uuid;

use crate::record::{SpanRecord, VerdictRecord};

/// A span under construction. Captured attributes accumulate here until
/// [`finish`](Self::finish) turns them into a [`SpanRecord`].
#[derive(Debug)]
pub struct LoggedSpan {
    id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    attributes: Mutex<BTreeMap<String, String>>,
}

impl LoggedSpan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            started_at: Utc::now(),
            attributes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.lock().get(key).cloned()
    }

    /// Close the span, stamping the end time.
    pub fn finish(&self, verdict: Option<&FilterVerdict>) -> SpanRecord {
        SpanRecord {
            id: self.id,
            name: self.name.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            attributes: self.attributes.lock().clone(),
            verdict: verdict.map(VerdictRecord::from),
        }
    }
}

impl SpanSink for LoggedSpan {
    fn set_attribute(&self, key: &str, value: String) {
        self.attributes.lock().insert(key.to_string(), value);
    }
}
