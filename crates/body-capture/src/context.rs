use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use request_policy::RequestHeaders;

use crate::attributes::SpanSink;
use crate::buffer::BodyBuffer;
use crate::charset::Charset;

/// What happens once a context's body has been recorded.
#[derive(Debug, Clone)]
pub enum CaptureStage {
    /// The body is evaluated against the filter chain together with the
    /// request's headers.
    Request(RequestHeaders),
    /// Recorded only.
    Response,
}

/// Capture state for one live stream: where the body goes and what has been
/// buffered so far.
pub struct CaptureContext {
    span: Arc<dyn SpanSink>,
    buffer: BodyBuffer,
    attribute_key: String,
    charset: Charset,
    stage: CaptureStage,
    captured: bool,
}

/// A context shared between the stream that fills it and whoever finalizes it.
pub type SharedContext = Arc<Mutex<CaptureContext>>;

pub fn shared(context: CaptureContext) -> SharedContext {
    Arc::new(Mutex::new(context))
}

impl fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureContext")
            .field("attribute_key", &self.attribute_key)
            .field("charset", &self.charset)
            .field("buffered", &self.buffer.len())
            .field("stage", &self.stage)
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl CaptureContext {
    pub fn request(
        span: Arc<dyn SpanSink>,
        attribute_key: impl Into<String>,
        buffer: BodyBuffer,
        charset: Charset,
        headers: RequestHeaders,
    ) -> Self {
        Self::new(span, attribute_key, buffer, charset, CaptureStage::Request(headers))
    }

    pub fn response(
        span: Arc<dyn SpanSink>,
        attribute_key: impl Into<String>,
        buffer: BodyBuffer,
        charset: Charset,
    ) -> Self {
        Self::new(span, attribute_key, buffer, charset, CaptureStage::Response)
    }

    fn new(
        span: Arc<dyn SpanSink>,
        attribute_key: impl Into<String>,
        buffer: BodyBuffer,
        charset: Charset,
        stage: CaptureStage,
    ) -> Self {
        Self {
            span,
            buffer,
            attribute_key: attribute_key.into(),
            charset,
            stage,
            captured: false,
        }
    }

    /// Buffer `bytes`. Ignored once the body has been captured, until
    /// [`reset`](Self::reset).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if !self.captured {
            self.buffer.write_bytes(bytes, self.charset);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        if !self.captured {
            self.buffer.write_str(s);
        }
    }

    pub fn render(&self) -> String {
        self.buffer.render(self.charset)
    }

    /// Start a fresh capture cycle for a reused stream.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.captured = false;
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    /// Flip the captured flag. Returns `false` if it was already set.
    pub(crate) fn mark_captured(&mut self) -> bool {
        !std::mem::replace(&mut self.captured, true)
    }

    pub fn span(&self) -> &Arc<dyn SpanSink> {
        &self.span
    }

    pub fn attribute_key(&self) -> &str {
        &self.attribute_key
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn stage(&self) -> &CaptureStage {
        &self.stage
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Capture state for a decoded form parameter map, recorded at most once.
pub struct FormCapture {
    span: Arc<dyn SpanSink>,
    attribute_key: String,
    headers: RequestHeaders,
    captured: bool,
}

impl fmt::Debug for FormCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormCapture")
            .field("attribute_key", &self.attribute_key)
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl FormCapture {
    pub fn new(
        span: Arc<dyn SpanSink>,
        attribute_key: impl Into<String>,
        headers: RequestHeaders,
    ) -> Self {
        Self {
            span,
            attribute_key: attribute_key.into(),
            headers,
            captured: false,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub(crate) fn mark_captured(&mut self) -> bool {
        !std::mem::replace(&mut self.captured, true)
    }

    pub fn span(&self) -> &Arc<dyn SpanSink> {
        &self.span
    }

    pub fn attribute_key(&self) -> &str {
        &self.attribute_key
    }

    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::RecordingSpan;
    use crate::buffer::BoundedBuffer;

    fn context(capacity: usize) -> CaptureContext {
        CaptureContext::response(
            Arc::new(RecordingSpan::new()),
            "http.response.body",
            BodyBuffer::Bytes(BoundedBuffer::new(capacity, Charset::Utf8)),
            Charset::Utf8,
        )
    }

    #[test]
    fn writes_accumulate_until_captured() {
        let mut ctx = context(16);
        ctx.write_bytes(b"{\"a\":");
        ctx.write_str("1}");
        assert_eq!(ctx.render(), "{\"a\":1}");

        assert!(ctx.mark_captured());
        assert!(!ctx.mark_captured());
        ctx.write_bytes(b"ignored");
        assert_eq!(ctx.render(), "{\"a\":1}");
    }

    #[test]
    fn reset_starts_new_cycle() {
        let mut ctx = context(16);
        ctx.write_bytes(b"first");
        ctx.mark_captured();
        ctx.reset();
        assert!(!ctx.is_captured());
        assert_eq!(ctx.buffered_len(), 0);
        ctx.write_bytes(b"second");
        assert_eq!(ctx.render(), "second");
    }
}
