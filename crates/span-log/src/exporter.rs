//! Batched JSON-lines export of finished spans.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::record::SpanRecord;

#[derive(Debug, thiserror::Error)]
pub enum SpanLogError {
    #[error("failed to open span log {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode span {span}: {source}")]
    Encode {
        span: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to export {spans} span(s) to {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        spans: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Appends batches of [`SpanRecord`]s to a file. Each batch is encoded up
/// front and lands in a single write followed by a flush, so a batch is
/// either exported whole or reported as failed.
#[derive(Debug)]
pub struct SpanExporter {
    path: PathBuf,
    file: tokio::fs::File,
    exported: u64,
}

impl SpanExporter {
    /// Open `path` for appending, creating missing parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SpanLogError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| SpanLogError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        Ok(Self {
            path,
            file,
            exported: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spans exported since the file was opened.
    pub fn exported(&self) -> u64 {
        self.exported
    }

    /// Export `batch`, returning how many spans were written. A span that
    /// cannot be encoded is skipped with a warning; the rest of the batch
    /// still goes out.
    pub async fn export(&mut self, batch: &[SpanRecord]) -> Result<usize, SpanLogError> {
        let mut lines = Vec::with_capacity(batch.len() * 256);
        let mut encoded = 0;
        for record in batch {
            match encode_line(record, &mut lines) {
                Ok(()) => encoded += 1,
                Err(err) => warn!(%err, "span skipped"),
            }
        }
        if encoded == 0 {
            return Ok(0);
        }

        if let Err(source) = self.append(&lines).await {
            return Err(SpanLogError::Export {
                path: self.path.clone(),
                spans: encoded,
                source,
            });
        }
        self.exported += encoded as u64;
        Ok(encoded)
    }

    async fn append(&mut self, lines: &[u8]) -> std::io::Result<()> {
        self.file.write_all(lines).await?;
        self.file.flush().await
    }
}

/// Append `record` and a newline to `out`. On failure `out` is left as it
/// was.
fn encode_line(record: &SpanRecord, out: &mut Vec<u8>) -> Result<(), SpanLogError> {
    let start = out.len();
    if let Err(source) = serde_json::to_writer(&mut *out, record) {
        out.truncate(start);
        return Err(SpanLogError::Encode {
            span: record.id,
            source,
        });
    }
    out.push(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<SpanRecord>(line).unwrap().name)
            .collect()
    }

    #[tokio::test]
    async fn batches_append_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/spans.jsonl");

        let mut exporter = SpanExporter::open(&path).await.unwrap();
        let batch = [SpanRecord::new("first"), SpanRecord::new("second")];
        assert_eq!(exporter.export(&batch).await.unwrap(), 2);
        assert_eq!(exporter.export(&[]).await.unwrap(), 0);
        assert_eq!(exporter.exported(), 2);
        drop(exporter);

        let mut exporter = SpanExporter::open(&path).await.unwrap();
        exporter.export(&[SpanRecord::new("third")]).await.unwrap();
        assert_eq!(exporter.exported(), 1);

        assert_eq!(names(&path), ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn open_error_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = SpanExporter::open(blocker.join("spans.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpanLogError::Open { .. }));
        assert!(err.to_string().contains("not-a-dir"));
    }

    #[test]
    fn encoded_line_is_one_json_object() {
        let record = SpanRecord::new("GET /").with_attribute("http.request.body", "a\nb");
        let mut out = b"prior\n".to_vec();
        encode_line(&record, &mut out).unwrap();

        let line = &out[b"prior\n".len()..];
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        let back: SpanRecord = serde_json::from_slice(line).unwrap();
        assert_eq!(back, record);
    }
}
