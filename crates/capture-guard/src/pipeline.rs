use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Result;
use body_capture::{
    CaptureRuntime, FormCapture, Instrumented, InstrumentedReader, InstrumentedWriter, SpanSink,
    HTTP_REQUEST_BODY,
};
use request_policy::{FilterVerdict, RequestBlocked, RequestHeaders};
use serde::{Deserialize, Serialize};
use span_log::{LoggedSpan, SpanRecord};
use tracing::debug;

/// One request as read from the replay stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub headers: RequestHeaders,
    #[serde(default)]
    pub body: Option<String>,
    /// Decoded form parameters, used instead of `body` when present.
    #[serde(default)]
    pub form: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub response: Option<ResponseRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseRecord {
    #[serde(default)]
    pub headers: RequestHeaders,
    #[serde(default)]
    pub body: Option<String>,
}

/// Where in the request lifecycle the decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Headers,
    Body,
    Complete,
}

/// What happened to one request.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub span_id: String,
    pub name: String,
    pub blocked: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub stage: Stage,
    pub attributes: BTreeMap<String, String>,
}

/// Drives a recorded request through capture and policy the way a framework
/// adapter would.
pub struct Pipeline {
    runtime: Arc<CaptureRuntime>,
}

impl Pipeline {
    pub fn new(runtime: Arc<CaptureRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<CaptureRuntime> {
        &self.runtime
    }

    pub fn process(&self, request: &RequestRecord) -> Result<(Outcome, SpanRecord)> {
        self.process_into(request, std::io::sink())
    }

    /// Like [`process`](Self::process), writing the response body to
    /// `response_sink`.
    pub fn process_into<W: Write>(
        &self,
        request: &RequestRecord,
        response_sink: W,
    ) -> Result<(Outcome, SpanRecord)> {
        let name = request.name.clone().unwrap_or_else(|| "request".to_string());
        let span = Arc::new(LoggedSpan::new(name.clone()));
        let sink: Arc<dyn SpanSink> = span.clone();

        let (verdict, stage) = match self.run(request, &sink, response_sink) {
            Ok((verdict, stage)) => (verdict, stage),
            Err(Interrupted::Blocked(blocked, stage)) => (blocked.verdict, stage),
            Err(Interrupted::Failed(err)) => return Err(err),
        };

        let record = span.finish(Some(&verdict));
        debug!(span = %record.id, blocked = verdict.blocked, ?stage, "request processed");
        let outcome = Outcome {
            span_id: record.id.to_string(),
            name,
            blocked: verdict.blocked,
            status: verdict.status.as_u16(),
            reason: verdict.reason,
            stage,
            attributes: record.attributes.clone(),
        };
        Ok((outcome, record))
    }

    fn run<W: Write>(
        &self,
        request: &RequestRecord,
        span: &Arc<dyn SpanSink>,
        response_sink: W,
    ) -> Result<(FilterVerdict, Stage), Interrupted> {
        let runtime = &self.runtime;
        let header_verdict = runtime
            .on_request_headers(span.as_ref(), &request.headers)
            .map_err(|blocked| Interrupted::Blocked(blocked, Stage::Headers))?;

        let body = request.body.as_deref().unwrap_or_default().as_bytes();
        let mut reader = InstrumentedReader::new(body, Arc::clone(runtime));
        let mut writer = InstrumentedWriter::new(response_sink, Arc::clone(runtime));
        let listener = runtime
            .listener(Arc::clone(span))
            .track_request(reader.handle())
            .track_response(writer.store_key(), writer.handle())
            .build();

        let body_verdict = match &request.form {
            Some(form) => {
                let mut capture =
                    FormCapture::new(Arc::clone(span), HTTP_REQUEST_BODY, request.headers.clone());
                runtime
                    .finalizer()
                    .capture_form(&mut capture, form)
                    .map(|_| ())
                    .map_err(BodyError::from)
            }
            None => {
                runtime.attach_request_stream(&reader, Arc::clone(span), &request.headers);
                read_body(&mut reader)
            }
        };
        if let Err(err) = body_verdict {
            listener.on_error(&RequestHeaders::new());
            return Err(err.into_interrupted(Stage::Body));
        }

        let response_headers = match &request.response {
            Some(response) => {
                runtime.attach_response_stream(
                    &writer,
                    Arc::clone(span),
                    response.headers.get("content-type"),
                    response.headers.get("content-length"),
                );
                if let Some(body) = &response.body {
                    if let Err(err) = writer.write_all(body.as_bytes()) {
                        listener.on_error(&response.headers);
                        let err = anyhow::Error::new(err).context("failed to write response body");
                        return Err(Interrupted::Failed(err));
                    }
                }
                response.headers.clone()
            }
            None => RequestHeaders::new(),
        };
        listener.on_complete(&response_headers);

        Ok((header_verdict, Stage::Complete))
    }
}

enum Interrupted {
    Blocked(RequestBlocked, Stage),
    Failed(anyhow::Error),
}

enum BodyError {
    Blocked(RequestBlocked),
    Io(std::io::Error),
}

impl BodyError {
    fn into_interrupted(self, stage: Stage) -> Interrupted {
        match self {
            BodyError::Blocked(blocked) => Interrupted::Blocked(blocked, stage),
            BodyError::Io(err) => {
                Interrupted::Failed(anyhow::Error::new(err).context("failed to read request body"))
            }
        }
    }
}

impl From<RequestBlocked> for BodyError {
    fn from(blocked: RequestBlocked) -> Self {
        BodyError::Blocked(blocked)
    }
}

fn read_body<R: Read>(reader: &mut R) -> Result<(), BodyError> {
    let mut sink = Vec::new();
    match reader.read_to_end(&mut sink) {
        Ok(_) => Ok(()),
        Err(err) => match RequestBlocked::from_io(&err) {
            Some(blocked) => Err(BodyError::Blocked(blocked.clone())),
            None => Err(BodyError::Io(err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use body_capture::CaptureSettings;
    use request_policy::{
        registry, EvaluatorEntry, EvaluatorKind, FilterRegistryConfig, PolicySnapshot, SnapshotCell,
        TtlEntry,
    };

    fn pipeline(snapshot: Option<PolicySnapshot>) -> Pipeline {
        let cell = Arc::new(match snapshot {
            Some(snapshot) => SnapshotCell::with_snapshot(snapshot),
            None => SnapshotCell::new(),
        });
        let config = FilterRegistryConfig {
            evaluators: vec![
                EvaluatorEntry::enabled(EvaluatorKind::Mock),
                EvaluatorEntry::enabled(EvaluatorKind::IpAddress),
            ],
        };
        let chain = registry::build_chain(&config, cell);
        Pipeline::new(Arc::new(CaptureRuntime::new(CaptureSettings::default(), chain)))
    }

    fn record(json: &str) -> RequestRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn allowed_request_captures_both_bodies() {
        let pipeline = pipeline(None);
        let (outcome, span) = pipeline
            .process(&record(
                r#"{
                    "name": "POST /orders",
                    "headers": {"Content-Type": "application/json"},
                    "body": "{\"item\":7}",
                    "response": {
                        "headers": {"content-type": "application/json"},
                        "body": "{\"id\":1}"
                    }
                }"#,
            ))
            .unwrap();

        assert!(!outcome.blocked);
        assert_eq!(outcome.stage, Stage::Complete);
        assert_eq!(span.attributes["http.request.body"], "{\"item\":7}");
        assert_eq!(span.attributes["http.response.body"], "{\"id\":1}");
        assert_eq!(
            span.attributes["http.response.header.content-type"],
            "application/json"
        );
        assert!(pipeline.runtime().registry().is_empty());
    }

    #[test]
    fn deny_listed_ip_blocked_at_headers() {
        let snapshot = PolicySnapshot::new(Vec::new(), vec![TtlEntry::permanent(["192.0.2.7"])]);
        let pipeline = pipeline(Some(snapshot));
        let (outcome, span) = pipeline
            .process(&record(r#"{"headers": {"X-Forwarded-For": "192.0.2.7, 10.1.1.1"}}"#))
            .unwrap();

        assert!(outcome.blocked);
        assert_eq!(outcome.status, 403);
        assert_eq!(outcome.stage, Stage::Headers);
        assert!(span.verdict.unwrap().blocked);
    }

    #[test]
    fn form_recorded_as_json() {
        let pipeline = pipeline(None);
        let (outcome, span) = pipeline
            .process(&record(
                r#"{"headers": {"content-type": "application/x-www-form-urlencoded"},
                    "form": {"user": "ada"}}"#,
            ))
            .unwrap();
        assert!(!outcome.blocked);
        let form: serde_json::Value =
            serde_json::from_str(&span.attributes["http.request.body"]).unwrap();
        assert_eq!(form["user"], "ada");
    }

    #[test]
    fn uncaptured_content_type_skips_body() {
        let pipeline = pipeline(None);
        let (outcome, span) = pipeline
            .process(&record(
                r#"{"headers": {"content-type": "image/png"}, "body": "PNG"}"#,
            ))
            .unwrap();
        assert!(!outcome.blocked);
        assert!(!span.attributes.contains_key("http.request.body"));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_response_write_releases_contexts() {
        let pipeline = pipeline(None);
        let err = pipeline
            .process_into(
                &record(
                    r#"{
                        "headers": {"content-type": "application/json"},
                        "body": "{}",
                        "response": {
                            "headers": {"content-type": "application/json"},
                            "body": "{\"id\":1}"
                        }
                    }"#,
                ),
                BrokenPipe,
            )
            .unwrap_err();

        assert!(format!("{err:#}").contains("failed to write response body"));
        assert!(pipeline.runtime().registry().is_empty());
    }
}
