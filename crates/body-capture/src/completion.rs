//! Finalization for requests that complete asynchronously.
//!
//! One [`CompletionListener`] is registered per logical request. Success and
//! error signals race for a single atomic flag; the winner captures the
//! response body and headers and detaches every tracked stream, the loser
//! does nothing. A timeout never finalizes and leaves the flag alone, so a
//! later success or error still runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use request_policy::RequestHeaders;
use tracing::{debug, warn};

use crate::attributes::SpanSink;
use crate::finalizer::Finalized;
use crate::resource::{ResourceHandle, ResourceKey};
use crate::runtime::CaptureRuntime;
use crate::store::StoreKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This signal won; `bodies` response bodies were recorded.
    Finalized { bodies: usize },
    /// Another signal already finalized the request.
    AlreadyHandled,
    /// Timeouts do not finalize.
    TimedOut,
}

/// Collects the streams a listener is responsible for.
pub struct ListenerBuilder {
    runtime: Arc<CaptureRuntime>,
    span: Arc<dyn SpanSink>,
    cleanup: Vec<ResourceKey>,
    responses: Vec<(StoreKey, ResourceKey)>,
}

impl ListenerBuilder {
    pub(crate) fn new(runtime: Arc<CaptureRuntime>, span: Arc<dyn SpanSink>) -> Self {
        Self {
            runtime,
            span,
            cleanup: Vec::new(),
            responses: Vec::new(),
        }
    }

    /// Detach `resource` from every store once the request completes.
    pub fn track_request(mut self, resource: &ResourceHandle) -> Self {
        self.cleanup.push(resource.key());
        self
    }

    /// Capture the response context held for `resource` under `store`,
    /// then detach it.
    pub fn track_response(mut self, store: StoreKey, resource: &ResourceHandle) -> Self {
        let key = resource.key();
        self.cleanup.push(key.clone());
        self.responses.push((store, key));
        self
    }

    pub fn build(self) -> CompletionListener {
        CompletionListener {
            handled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(ListenerState {
                runtime: self.runtime,
                span: self.span,
                cleanup: self.cleanup,
                responses: self.responses,
            }),
        }
    }
}

struct ListenerState {
    runtime: Arc<CaptureRuntime>,
    span: Arc<dyn SpanSink>,
    cleanup: Vec<ResourceKey>,
    responses: Vec<(StoreKey, ResourceKey)>,
}

/// Completion callbacks for one request. Clones share the handled flag.
#[derive(Clone)]
pub struct CompletionListener {
    handled: Arc<AtomicBool>,
    state: Arc<ListenerState>,
}

impl fmt::Debug for CompletionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionListener")
            .field("handled", &self.is_handled())
            .field("tracked", &self.state.cleanup.len())
            .finish()
    }
}

impl CompletionListener {
    pub fn on_complete(&self, response_headers: &RequestHeaders) -> CompletionOutcome {
        self.finalize("complete", response_headers)
    }

    pub fn on_error(&self, response_headers: &RequestHeaders) -> CompletionOutcome {
        self.finalize("error", response_headers)
    }

    pub fn on_timeout(&self) -> CompletionOutcome {
        debug!("async request timed out, leaving capture unfinalized");
        CompletionOutcome::TimedOut
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    fn finalize(
        &self,
        signal: &'static str,
        response_headers: &RequestHeaders,
    ) -> CompletionOutcome {
        if self
            .handled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(signal, "completion already handled");
            return CompletionOutcome::AlreadyHandled;
        }

        let state = &self.state;
        let registry = state.runtime.registry();
        let mut bodies = 0;
        for (store, key) in &state.responses {
            let Some(context) = registry.get_key(*store, key) else {
                continue;
            };
            let mut context = context.lock();
            match state.runtime.finalizer().capture_body(&mut context) {
                Ok(Finalized::Recorded) => bodies += 1,
                Ok(Finalized::AlreadyCaptured) => {}
                Err(blocked) => {
                    // The response has already been committed; record only.
                    warn!(error = %blocked, "policy blocked after response completion");
                    bodies += 1;
                }
            }
        }

        state
            .runtime
            .record_response_headers(state.span.as_ref(), response_headers);

        let detached: usize = state.cleanup.iter().map(|key| registry.detach_all(key)).sum();
        debug!(signal, bodies, detached, "async request finalized");
        CompletionOutcome::Finalized { bodies }
    }
}
