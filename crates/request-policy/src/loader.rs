//! Parsing of policy documents into [`PolicySnapshot`]s.
//!
//! The remote endpoint delivers a JSON document whose blocking data sits at a
//! nested path (addressed with a JSON pointer such as
//! `/result/capture/http/request`). At that path the loader expects:
//!
//! ```json
//! {
//!   "allowlist": [{ "values": ["10.0.0.1"], "expiry": 1767225600000 }],
//!   "denylist":  [{ "values": ["192.0.2.7"] }]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::snapshot::{PolicySnapshot, TtlEntry};

/// Errors produced while turning a policy document into a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("document path '{0}' not found in policy document")]
    MissingPath(String),

    #[error("invalid policy document: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("failed to read snapshot file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    #[serde(default, alias = "allow_list")]
    allowlist: Vec<TtlEntry>,
    #[serde(default, alias = "deny_list")]
    denylist: Vec<TtlEntry>,
}

/// Extract the blocking data at `pointer` from a fetched document.
///
/// An empty pointer addresses the whole document.
pub fn snapshot_from_document(
    document: &serde_json::Value,
    pointer: &str,
) -> Result<PolicySnapshot, SnapshotError> {
    let node = document
        .pointer(pointer)
        .ok_or_else(|| SnapshotError::MissingPath(pointer.to_string()))?;
    let parsed = SnapshotDocument::deserialize(node)?;
    Ok(PolicySnapshot::new(parsed.allowlist, parsed.denylist))
}

/// Parse a snapshot from a JSON string holding the blocking data directly.
pub fn load_snapshot_from_str(json: &str) -> Result<PolicySnapshot, SnapshotError> {
    let document: serde_json::Value = serde_json::from_str(json)?;
    snapshot_from_document(&document, "")
}

/// Load a snapshot from a local JSON file, e.g. for offline evaluation.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<PolicySnapshot, SnapshotError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_snapshot_from_str(&contents)
}
