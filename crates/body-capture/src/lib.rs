//! # body-capture
//!
//! Bounded, reentrancy-safe capture of request and response bodies for the
//! capture-guard project, with policy enforcement at end of body.
//!
//! An adapter wraps a framework's streams in the instrumented types from
//! [`stream`], attaches a [`CaptureContext`] to each through the shared
//! [`CaptureRuntime`], and turns a [`RequestBlocked`] into a rejected
//! response.
//!
//! ## Quick start
//!
//! ```rust
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! use body_capture::{
//!     CaptureRuntime, CaptureSettings, InstrumentedReader, RecordingSpan, HTTP_REQUEST_BODY,
//! };
//! use request_policy::{FilterChain, RequestHeaders};
//!
//! let settings = CaptureSettings::default();
//! let runtime = Arc::new(CaptureRuntime::new(settings, FilterChain::default()));
//! let span = Arc::new(RecordingSpan::new());
//! let headers: RequestHeaders = [("Content-Type", "application/json")].into_iter().collect();
//!
//! let mut body = InstrumentedReader::new(&b"{\"user\":\"ada\"}"[..], Arc::clone(&runtime));
//! runtime.on_request_headers(span.as_ref(), &headers).unwrap();
//! runtime.attach_request_stream(&body, span.clone(), &headers);
//!
//! let mut text = String::new();
//! body.read_to_string(&mut text).unwrap();
//! assert_eq!(span.attribute(HTTP_REQUEST_BODY).as_deref(), Some("{\"user\":\"ada\"}"));
//! ```

mod attributes;
mod buffer;
mod charset;
mod completion;
mod content_type;
mod context;
mod finalizer;
pub mod guard;
mod resource;
mod runtime;
mod settings;
mod store;
pub mod stream;

pub use attributes::{
    request_header_key, response_header_key, RecordingSpan, SpanSink, HTTP_REQUEST_BODY,
    HTTP_RESPONSE_BODY, RPC_REQUEST_BODY, RPC_RESPONSE_BODY,
};
pub use buffer::{BodyBuffer, BoundedBuffer, BoundedCharBuffer};
pub use charset::{parse_charset, Charset};
pub use completion::{CompletionListener, CompletionOutcome, ListenerBuilder};
pub use content_type::{initial_allocation, parse_content_length, ContentTypeGate};
pub use context::{shared, CaptureContext, CaptureStage, FormCapture, SharedContext};
pub use finalizer::{CaptureFinalizer, Finalized};
pub use guard::CallDepthGuard;
pub use request_policy::RequestBlocked;
pub use resource::{ResourceClass, ResourceHandle, ResourceKey};
pub use runtime::CaptureRuntime;
pub use settings::{CaptureSettings, CaptureToggles, DEFAULT_BODY_MAX_SIZE_BYTES};
pub use store::{CorrelationRegistry, CorrelationStore, Direction, StoreKey};
pub use stream::{
    Instrumented, InstrumentedLineReader, InstrumentedReader, InstrumentedTextWriter,
    InstrumentedWriter,
};
