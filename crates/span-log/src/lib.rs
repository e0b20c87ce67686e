//! Append-only JSON-lines span log for the capture-guard project.
//!
//! Captured attributes are collected on a [`LoggedSpan`] (a
//! [`body_capture::SpanSink`]). When the request is done the span is turned
//! into a [`SpanRecord`] and handed to the [`SpanLog`], whose background task
//! batches records and appends each batch to a file through a
//! [`SpanExporter`], one JSON object per line.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use body_capture::SpanSink;
//! use span_log::{LoggedSpan, SpanLog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (log, _handle) = SpanLog::start("/var/log/capture-guard/spans.jsonl").await?;
//!
//! let span = LoggedSpan::new("POST /login");
//! span.set_attribute("http.request.body", "{\"user\":\"ada\"}".to_string());
//! log.log(span.finish(None)).await;
//! # Ok(())
//! # }
//! ```

pub mod exporter;
pub mod log;
pub mod record;
pub mod span;

pub use exporter::{SpanExporter, SpanLogError};
pub use log::{SpanLog, MAX_BATCH};
pub use record::{SpanRecord, VerdictRecord};
pub use span::LoggedSpan;
