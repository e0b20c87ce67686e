use std::collections::BTreeMap;

use parking_lot::Mutex;

pub const HTTP_REQUEST_BODY: &str = "http.request.body";
pub const HTTP_RESPONSE_BODY: &str = "http.response.body";
pub const RPC_REQUEST_BODY: &str = "rpc.request.body";
pub const RPC_RESPONSE_BODY: &str = "rpc.response.body";

const HTTP_REQUEST_HEADER_PREFIX: &str = "http.request.header.";
const HTTP_RESPONSE_HEADER_PREFIX: &str = "http.response.header.";

pub fn request_header_key(name: &str) -> String {
    format!("{HTTP_REQUEST_HEADER_PREFIX}{}", name.to_ascii_lowercase())
}

pub fn response_header_key(name: &str) -> String {
    format!("{HTTP_RESPONSE_HEADER_PREFIX}{}", name.to_ascii_lowercase())
}

/// Destination for captured attributes, typically the span of the request
/// being processed.
pub trait SpanSink: Send + Sync {
    fn set_attribute(&self, key: &str, value: String);
}

/// In-memory [`SpanSink`] that keeps every write, in order.
#[derive(Debug, Default)]
pub struct RecordingSpan {
    writes: Mutex<Vec<(String, String)>>,
}

impl RecordingSpan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value written under `key`.
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// How many times `key` was written.
    pub fn write_count(&self, key: &str) -> usize {
        self.writes.lock().iter().filter(|(k, _)| k == key).count()
    }

    /// Final value of every attribute.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.writes.lock().iter().cloned().collect()
    }

    pub fn total_writes(&self) -> usize {
        self.writes.lock().len()
    }
}

impl SpanSink for RecordingSpan {
    fn set_attribute(&self, key: &str, value: String) {
        self.writes.lock().push((key.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_are_lowercased() {
        assert_eq!(request_header_key("Content-Type"), "http.request.header.content-type");
        assert_eq!(response_header_key("X-Trace"), "http.response.header.x-trace");
    }

    #[test]
    fn recording_span_keeps_last_value_and_counts() {
        let span = RecordingSpan::new();
        span.set_attribute("a", "1".into());
        span.set_attribute("a", "2".into());
        span.set_attribute("b", "3".into());
        assert_eq!(span.attribute("a").as_deref(), Some("2"));
        assert_eq!(span.write_count("a"), 2);
        assert_eq!(span.attributes().len(), 2);
        assert_eq!(span.total_writes(), 3);
        assert!(span.attribute("missing").is_none());
    }
}
