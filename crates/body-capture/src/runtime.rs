use std::sync::Arc;

use request_policy::{FilterChain, FilterVerdict, RequestBlocked, RequestHeaders};
use tracing::debug;

use crate::attributes::{
    request_header_key, response_header_key, SpanSink, HTTP_REQUEST_BODY, HTTP_RESPONSE_BODY,
};
use crate::buffer::{BodyBuffer, BoundedBuffer, BoundedCharBuffer};
use crate::charset::{parse_charset, Charset};
use crate::completion::ListenerBuilder;
use crate::content_type::{initial_allocation, parse_content_length, ContentTypeGate};
use crate::context::{shared, CaptureContext, SharedContext};
use crate::finalizer::CaptureFinalizer;
use crate::resource::{ResourceClass, ResourceHandle};
use crate::settings::CaptureSettings;
use crate::store::{CorrelationRegistry, Direction, StoreKey};
use crate::stream::Instrumented;

/// Process-wide capture state: settings, the correlation registry and the
/// finalizer. Shared behind an `Arc` by every instrumented stream.
#[derive(Debug)]
pub struct CaptureRuntime {
    settings: CaptureSettings,
    gate: ContentTypeGate,
    registry: CorrelationRegistry,
    finalizer: CaptureFinalizer,
}

impl CaptureRuntime {
    pub fn new(settings: CaptureSettings, chain: FilterChain) -> Self {
        Self {
            gate: settings.gate(),
            settings,
            registry: CorrelationRegistry::new(),
            finalizer: CaptureFinalizer::new(chain),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn finalizer(&self) -> &CaptureFinalizer {
        &self.finalizer
    }

    /// Record request headers (when enabled) and run header-stage policy.
    pub fn on_request_headers(
        &self,
        span: &dyn SpanSink,
        headers: &RequestHeaders,
    ) -> Result<FilterVerdict, RequestBlocked> {
        if self.settings.http_headers.request {
            for (name, value) in headers.iter() {
                span.set_attribute(&request_header_key(name), value.to_string());
            }
        }
        self.finalizer.evaluate_headers(span, headers)
    }

    pub fn record_response_headers(&self, span: &dyn SpanSink, headers: &RequestHeaders) {
        if !self.settings.http_headers.response {
            return;
        }
        for (name, value) in headers.iter() {
            span.set_attribute(&response_header_key(name), value.to_string());
        }
    }

    /// Attach a request-body context to `resource` if request bodies are
    /// captured and the declared content type passes the gate. The gate is
    /// decided here, once.
    ///
    /// Prefer [`attach_request_stream`](Self::attach_request_stream) for the
    /// instrumented wrappers; `class` must match the class the reader was
    /// built with or the context is never found.
    pub fn attach_request_body(
        &self,
        resource: &ResourceHandle,
        class: ResourceClass,
        span: Arc<dyn SpanSink>,
        headers: &RequestHeaders,
    ) -> Option<SharedContext> {
        self.attach_request(StoreKey::new(class, Direction::Request), resource, span, headers)
    }

    /// Attach a request-body context to an instrumented stream, keyed by the
    /// stream's own store.
    pub fn attach_request_stream<S: Instrumented + ?Sized>(
        &self,
        stream: &S,
        span: Arc<dyn SpanSink>,
        headers: &RequestHeaders,
    ) -> Option<SharedContext> {
        self.attach_request(stream.store_key(), stream.handle(), span, headers)
    }

    /// Attach a response-body context to `resource`, gated like requests.
    pub fn attach_response_body(
        &self,
        resource: &ResourceHandle,
        class: ResourceClass,
        span: Arc<dyn SpanSink>,
        content_type: Option<&str>,
        content_length: Option<&str>,
    ) -> Option<SharedContext> {
        let store = StoreKey::new(class, Direction::Response);
        self.attach_response(store, resource, span, content_type, content_length)
    }

    pub fn attach_response_stream<S: Instrumented + ?Sized>(
        &self,
        stream: &S,
        span: Arc<dyn SpanSink>,
        content_type: Option<&str>,
        content_length: Option<&str>,
    ) -> Option<SharedContext> {
        let store = stream.store_key();
        self.attach_response(store, stream.handle(), span, content_type, content_length)
    }

    fn attach_request(
        &self,
        store: StoreKey,
        resource: &ResourceHandle,
        span: Arc<dyn SpanSink>,
        headers: &RequestHeaders,
    ) -> Option<SharedContext> {
        if !self.settings.http_body.request {
            return None;
        }
        let content_type = headers.get("content-type");
        if !self.gate.should_capture(content_type) {
            debug!(content_type, "request body not captured for content type");
            return None;
        }

        let charset = parse_charset(content_type);
        let length = parse_content_length(headers.get("content-length"));
        let context = shared(CaptureContext::request(
            span,
            HTTP_REQUEST_BODY,
            self.new_buffer(store.class, charset, length),
            charset,
            headers.clone(),
        ));
        self.registry.attach(store, resource, Arc::clone(&context));
        Some(context)
    }

    fn attach_response(
        &self,
        store: StoreKey,
        resource: &ResourceHandle,
        span: Arc<dyn SpanSink>,
        content_type: Option<&str>,
        content_length: Option<&str>,
    ) -> Option<SharedContext> {
        if !self.settings.http_body.response {
            return None;
        }
        if !self.gate.should_capture(content_type) {
            debug!(content_type, "response body not captured for content type");
            return None;
        }

        let charset = parse_charset(content_type);
        let length = parse_content_length(content_length);
        let context = shared(CaptureContext::response(
            span,
            HTTP_RESPONSE_BODY,
            self.new_buffer(store.class, charset, length),
            charset,
        ));
        self.registry.attach(store, resource, Arc::clone(&context));
        Some(context)
    }

    /// Start building a completion listener for one asynchronous request.
    pub fn listener(self: &Arc<Self>, span: Arc<dyn SpanSink>) -> ListenerBuilder {
        ListenerBuilder::new(Arc::clone(self), span)
    }

    /// Reclaim contexts whose streams were dropped without cleanup.
    pub fn sweep(&self) -> usize {
        self.registry.sweep()
    }

    fn new_buffer(
        &self,
        class: ResourceClass,
        charset: Charset,
        length: Option<usize>,
    ) -> BodyBuffer {
        let capacity = self.settings.body_max_size_bytes;
        let initial = initial_allocation(length, capacity);
        match class {
            ResourceClass::ByteInput | ResourceClass::ByteOutput => {
                BodyBuffer::Bytes(BoundedBuffer::with_initial(capacity, initial, charset))
            }
            ResourceClass::CharInput | ResourceClass::CharOutput => {
                BodyBuffer::Chars(BoundedCharBuffer::with_initial(capacity, initial))
            }
        }
    }
}
