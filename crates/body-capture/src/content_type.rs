/// Decides whether a body is worth capturing from its declared content type.
///
/// A content type passes when it contains any allowed fragment,
/// case-insensitively. Bodies without a content type are never captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeGate {
    allowed: Vec<String>,
}

pub const DEFAULT_CAPTURED_CONTENT_TYPES: [&str; 4] =
    ["json", "graphql", "xml", "x-www-form-urlencoded"];

impl Default for ContentTypeGate {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURED_CONTENT_TYPES)
    }
}

impl ContentTypeGate {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn should_capture(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let content_type = content_type.to_ascii_lowercase();
        self.allowed.iter().any(|fragment| content_type.contains(fragment.as_str()))
    }
}

/// Parse a `Content-Length` value; negative or malformed values are ignored.
pub fn parse_content_length(value: Option<&str>) -> Option<usize> {
    value?.trim().parse::<usize>().ok()
}

/// Initial allocation for a buffer: the declared length when known, never
/// more than `capacity`.
pub fn initial_allocation(content_length: Option<usize>, capacity: usize) -> usize {
    content_length.map_or(capacity, |len| len.min(capacity))
}
