//! Capture-exactly-once and the policy check that follows it.

use std::collections::BTreeMap;

use request_policy::{FilterChain, FilterVerdict, RequestBlocked, RequestHeaders};
use serde_json::Value;
use tracing::{debug, info};

use crate::attributes::SpanSink;
use crate::context::{CaptureContext, CaptureStage, FormCapture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// The body was written to the span (and evaluated, for requests).
    Recorded,
    /// A previous call already did the work; nothing happened.
    AlreadyCaptured,
}

/// Writes captured bodies to their span and runs the filter chain over them.
#[derive(Debug, Clone, Default)]
pub struct CaptureFinalizer {
    chain: FilterChain,
}

impl CaptureFinalizer {
    pub fn new(chain: FilterChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Record the context's body under its own attribute key.
    pub fn capture_body(&self, context: &mut CaptureContext) -> Result<Finalized, RequestBlocked> {
        let key = context.attribute_key().to_string();
        self.capture_body_as(context, &key)
    }

    /// Record the context's body under `key`.
    ///
    /// The first call renders the buffer, writes it to the span, marks the
    /// context captured and, for request contexts, evaluates the body with
    /// the request headers. Later calls are no-ops until the context is
    /// reset. Returns [`RequestBlocked`] when the combined verdict blocks.
    pub fn capture_body_as(
        &self,
        context: &mut CaptureContext,
        key: &str,
    ) -> Result<Finalized, RequestBlocked> {
        if !context.mark_captured() {
            return Ok(Finalized::AlreadyCaptured);
        }

        let body = context.render();
        debug!(attribute = key, bytes = body.len(), "body captured");
        let span = context.span();

        match context.stage() {
            CaptureStage::Response => span.set_attribute(key, body),
            CaptureStage::Request(headers) => {
                span.set_attribute(key, body.clone());
                let verdict = self.chain.evaluate(headers, Some(&body));
                apply_verdict(span.as_ref(), verdict)?;
            }
        }
        Ok(Finalized::Recorded)
    }

    /// Evaluate a request before its body is read.
    pub fn evaluate_headers(
        &self,
        span: &dyn SpanSink,
        headers: &RequestHeaders,
    ) -> Result<FilterVerdict, RequestBlocked> {
        apply_verdict(span, self.chain.evaluate(headers, None))
    }

    /// Record a decoded form parameter map as a JSON object, then evaluate it
    /// like a request body. Only the first call per [`FormCapture`] acts.
    pub fn capture_form(
        &self,
        form: &mut FormCapture,
        params: &BTreeMap<String, String>,
    ) -> Result<Finalized, RequestBlocked> {
        if !form.mark_captured() {
            return Ok(Finalized::AlreadyCaptured);
        }

        let object: serde_json::Map<String, Value> = params
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let body = Value::Object(object).to_string();
        debug!(attribute = form.attribute_key(), params = params.len(), "form captured");

        form.span().set_attribute(form.attribute_key(), body.clone());
        let verdict = self.chain.evaluate(form.headers(), Some(&body));
        apply_verdict(form.span().as_ref(), verdict)?;
        Ok(Finalized::Recorded)
    }
}

fn apply_verdict(
    span: &dyn SpanSink,
    verdict: FilterVerdict,
) -> Result<FilterVerdict, RequestBlocked> {
    for (key, value) in &verdict.attributes {
        span.set_attribute(key, value.clone());
    }
    if verdict.blocked {
        info!(
            status = verdict.status.as_u16(),
            reason = %verdict.reason,
            "request blocked by policy"
        );
        return Err(RequestBlocked::new(verdict));
    }
    Ok(verdict)
}
