use serde::{Deserialize, Serialize};

use crate::content_type::{ContentTypeGate, DEFAULT_CAPTURED_CONTENT_TYPES};

/// 128 KiB.
pub const DEFAULT_BODY_MAX_SIZE_BYTES: usize = 128 * 1024;

/// Per-direction capture switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureToggles {
    pub request: bool,
    pub response: bool,
}

impl Default for CaptureToggles {
    fn default() -> Self {
        Self {
            request: true,
            response: true,
        }
    }
}

/// What gets captured and how much of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Buffer capacity in bytes (or characters for text streams).
    pub body_max_size_bytes: usize,
    /// Content-type fragments, matched as case-insensitive substrings.
    pub allowed_content_types: Vec<String>,
    pub http_headers: CaptureToggles,
    pub http_body: CaptureToggles,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            body_max_size_bytes: DEFAULT_BODY_MAX_SIZE_BYTES,
            allowed_content_types: DEFAULT_CAPTURED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            http_headers: CaptureToggles::default(),
            http_body: CaptureToggles::default(),
        }
    }
}

impl CaptureSettings {
    pub fn gate(&self) -> ContentTypeGate {
        ContentTypeGate::new(&self.allowed_content_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.body_max_size_bytes, 131_072);
        assert!(settings.http_body.request && settings.http_body.response);
        assert!(settings.gate().should_capture(Some("application/json")));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "body_max_size_bytes: 16\nhttp_body:\n  response: false\n";
        let settings: CaptureSettings = serde_yml::from_str(yaml).unwrap();
        assert_eq!(settings.body_max_size_bytes, 16);
        assert!(settings.http_body.request);
        assert!(!settings.http_body.response);
        assert_eq!(settings.allowed_content_types.len(), 4);
    }
}
