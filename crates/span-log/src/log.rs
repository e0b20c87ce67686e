//! Background span export.
//!
//! [`SpanLog`] handles queue finished spans on a channel. A single task
//! groups them into batches and hands each batch to a [`SpanExporter`] when
//! it reaches [`MAX_BATCH`] spans, when the export interval ticks, on an
//! explicit [`SpanLog::flush`], and once more when the last handle is
//! dropped.

use std::path::Path;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::exporter::{SpanExporter, SpanLogError};
use crate::record::SpanRecord;

const CHANNEL_BUFFER: usize = 1024;

/// Spans per batch before an export is forced.
pub const MAX_BATCH: usize = 64;

const EXPORT_INTERVAL: Duration = Duration::from_secs(1);

enum Message {
    Span(SpanRecord),
    Flush(oneshot::Sender<usize>),
}

/// Cloneable handle feeding the background exporter.
#[derive(Debug, Clone)]
pub struct SpanLog {
    tx: mpsc::Sender<Message>,
}

impl SpanLog {
    /// Open `path` and spawn the export task.
    ///
    /// The task exits once every `SpanLog` clone has been dropped and the
    /// final batch is out; its result is the number of spans exported.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<u64>), SpanLogError> {
        let exporter = SpanExporter::open(path).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let handle = tokio::spawn(run_batcher(Batcher::new(exporter), rx));
        Ok((Self { tx }, handle))
    }

    pub async fn log(&self, record: SpanRecord) {
        if let Err(err) = self.tx.send(Message::Span(record)).await {
            if let Message::Span(record) = err.0 {
                warn!(span = %record.id, name = %record.name, "span log closed, span dropped");
            }
        }
    }

    /// Export everything queued so far and wait for it. Returns the number
    /// of spans that went out, or `None` if the export task is gone.
    pub async fn flush(&self) -> Option<usize> {
        let (done, exported) = oneshot::channel();
        self.tx.send(Message::Flush(done)).await.ok()?;
        exported.await.ok()
    }
}

struct Batcher {
    exporter: SpanExporter,
    pending: Vec<SpanRecord>,
}

impl Batcher {
    fn new(exporter: SpanExporter) -> Self {
        Self {
            exporter,
            pending: Vec::with_capacity(MAX_BATCH),
        }
    }

    async fn push(&mut self, record: SpanRecord) {
        self.pending.push(record);
        if self.pending.len() >= MAX_BATCH {
            self.export().await;
        }
    }

    /// Export the pending batch. A failed batch is dropped.
    async fn export(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(MAX_BATCH));
        match self.exporter.export(&batch).await {
            Ok(spans) => {
                debug!(spans, "span batch exported");
                spans
            }
            Err(err) => {
                error!(%err, "span batch dropped");
                0
            }
        }
    }
}

async fn run_batcher(mut batcher: Batcher, mut rx: mpsc::Receiver<Message>) -> u64 {
    let mut ticker = tokio::time::interval(EXPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Span(record)) => batcher.push(record).await,
                Some(Message::Flush(done)) => {
                    let spans = batcher.export().await;
                    let _ = done.send(spans);
                }
                None => break,
            },
            _ = ticker.tick() => {
                batcher.export().await;
            }
        }
    }

    batcher.export().await;
    let total = batcher.exporter.exported();
    debug!(total, path = %batcher.exporter.path().display(), "span log closed");
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(path: &Path) -> Vec<SpanRecord> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn flush_exports_pending_spans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.jsonl");
        let (log, handle) = SpanLog::start(&path).await.unwrap();

        for i in 0..3 {
            log.log(SpanRecord::new(format!("span-{i}"))).await;
        }
        assert_eq!(log.flush().await, Some(3));
        assert_eq!(log.flush().await, Some(0));
        assert_eq!(lines(&path).len(), 3);

        log.log(SpanRecord::new("late")).await;
        drop(log);
        assert_eq!(handle.await.unwrap(), 4);

        let records = lines(&path);
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].name, "late");
    }

    #[tokio::test]
    async fn full_batch_exports_without_waiting_for_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.jsonl");
        let (log, handle) = SpanLog::start(&path).await.unwrap();

        for i in 0..MAX_BATCH {
            log.log(SpanRecord::new(format!("span-{i}"))).await;
        }
        // The flush round-trip orders after the full batch; nothing is left
        // over for it to export.
        assert_eq!(log.flush().await, Some(0));
        assert_eq!(lines(&path).len(), MAX_BATCH);

        drop(log);
        assert_eq!(handle.await.unwrap(), MAX_BATCH as u64);
    }
}
