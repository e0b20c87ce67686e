//! Instrumented `std::io` / `std::fmt` stream wrappers.
//!
//! Each wrapper owns a [`ResourceHandle`]; the adapter attaches a capture
//! context to that handle through [`CaptureRuntime`]. A wrapper with no
//! attached context passes data through untouched. Capture only happens in
//! the outermost instrumented call on the current thread.

use std::io::{self, BufRead, Read, Write};
use std::{fmt, sync::Arc};

use request_policy::RequestBlocked;

use crate::finalizer::Finalized;
use crate::guard::CallDepthGuard;
use crate::resource::{ResourceClass, ResourceHandle};
use crate::runtime::CaptureRuntime;
use crate::store::{Direction, StoreKey};

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// An instrumented stream: the handle it is keyed by and the store it reads
/// its capture context from.
///
/// [`CaptureRuntime::attach_request_stream`] and
/// [`CaptureRuntime::attach_response_stream`] take any `Instrumented` so the
/// context always lands in the store the wrapper looks in.
pub trait Instrumented {
    fn handle(&self) -> &ResourceHandle;

    fn store_key(&self) -> StoreKey;
}

struct Probe {
    handle: ResourceHandle,
    store: StoreKey,
    runtime: Arc<CaptureRuntime>,
}

impl Probe {
    fn new(runtime: Arc<CaptureRuntime>, class: ResourceClass, direction: Direction) -> Self {
        Self {
            handle: ResourceHandle::new(),
            store: StoreKey::new(class, direction),
            runtime,
        }
    }

    fn record_bytes(&self, bytes: &[u8]) {
        if let Some(context) = self.runtime.registry().get(self.store, &self.handle) {
            context.lock().write_bytes(bytes);
        }
    }

    fn record_str(&self, s: &str) {
        if let Some(context) = self.runtime.registry().get(self.store, &self.handle) {
            context.lock().write_str(s);
        }
    }

    /// Finalize the attached context, if any.
    fn finalize(&self) -> Result<Option<Finalized>, RequestBlocked> {
        let Some(context) = self.runtime.registry().get(self.store, &self.handle) else {
            return Ok(None);
        };
        let mut context = context.lock();
        self.runtime.finalizer().capture_body(&mut context).map(Some)
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("handle", &self.handle)
            .field("store", &self.store)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Byte input
// ---------------------------------------------------------------------------

/// Reader that buffers what it reads and finalizes at end of stream.
///
/// A [`RequestBlocked`] raised at end of stream is returned as an
/// [`io::Error`]; recover it with [`RequestBlocked::from_io`].
#[derive(Debug)]
pub struct InstrumentedReader<R> {
    inner: R,
    probe: Probe,
}

impl<R> Instrumented for InstrumentedReader<R> {
    fn handle(&self) -> &ResourceHandle {
        &self.probe.handle
    }

    fn store_key(&self) -> StoreKey {
        self.probe.store
    }
}

impl<R: Read> InstrumentedReader<R> {
    /// Reader for an incoming request body.
    pub fn new(inner: R, runtime: Arc<CaptureRuntime>) -> Self {
        Self::with_direction(inner, runtime, Direction::Request)
    }

    /// Reader for either side, e.g. a client reading a response.
    pub fn with_direction(inner: R, runtime: Arc<CaptureRuntime>, direction: Direction) -> Self {
        Self {
            inner,
            probe: Probe::new(runtime, ResourceClass::ByteInput, direction),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for InstrumentedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = CallDepthGuard::enter(ResourceClass::ByteInput);
        let n = self.inner.read(buf)?;
        if !guard.is_outermost() {
            return Ok(n);
        }
        if n > 0 {
            self.probe.record_bytes(&buf[..n]);
        } else if !buf.is_empty() {
            self.probe.finalize().map_err(RequestBlocked::into_io_error)?;
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Char input
// ---------------------------------------------------------------------------

/// Line-oriented text reader; finalizes when `read_line` reports EOF.
#[derive(Debug)]
pub struct InstrumentedLineReader<R> {
    inner: R,
    probe: Probe,
}

impl<R> Instrumented for InstrumentedLineReader<R> {
    fn handle(&self) -> &ResourceHandle {
        &self.probe.handle
    }

    fn store_key(&self) -> StoreKey {
        self.probe.store
    }
}

impl<R: BufRead> InstrumentedLineReader<R> {
    pub fn new(inner: R, runtime: Arc<CaptureRuntime>) -> Self {
        Self {
            inner,
            probe: Probe::new(runtime, ResourceClass::CharInput, Direction::Request),
        }
    }

    /// Append one line to `line`, like [`BufRead::read_line`].
    pub fn read_line(&mut self, line: &mut String) -> io::Result<usize> {
        let guard = CallDepthGuard::enter(ResourceClass::CharInput);
        let start = line.len();
        let n = self.inner.read_line(line)?;
        if !guard.is_outermost() {
            return Ok(n);
        }
        if n > 0 {
            self.probe.record_str(&line[start..]);
        } else {
            self.probe.finalize().map_err(RequestBlocked::into_io_error)?;
        }
        Ok(n)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

// ---------------------------------------------------------------------------
// Byte output
// ---------------------------------------------------------------------------

/// Writer that buffers what it writes. Call [`finish`](Self::finish) at the
/// end of the response to record the body.
#[derive(Debug)]
pub struct InstrumentedWriter<W> {
    inner: W,
    probe: Probe,
}

impl<W> Instrumented for InstrumentedWriter<W> {
    fn handle(&self) -> &ResourceHandle {
        &self.probe.handle
    }

    fn store_key(&self) -> StoreKey {
        self.probe.store
    }
}

impl<W: Write> InstrumentedWriter<W> {
    /// Writer for an outgoing response body.
    pub fn new(inner: W, runtime: Arc<CaptureRuntime>) -> Self {
        Self::with_direction(inner, runtime, Direction::Response)
    }

    /// Writer for either side, e.g. a client sending a request body.
    pub fn with_direction(inner: W, runtime: Arc<CaptureRuntime>, direction: Direction) -> Self {
        Self {
            inner,
            probe: Probe::new(runtime, ResourceClass::ByteOutput, direction),
        }
    }

    /// Flush and record the body written so far. Returns `Ok(None)` when no
    /// context is attached.
    pub fn finish(&mut self) -> io::Result<Option<Finalized>> {
        self.inner.flush()?;
        self.probe.finalize().map_err(RequestBlocked::into_io_error)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for InstrumentedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let guard = CallDepthGuard::enter(ResourceClass::ByteOutput);
        let n = self.inner.write(buf)?;
        if guard.is_outermost() {
            self.probe.record_bytes(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Char output
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InstrumentedTextWriter<W> {
    inner: W,
    probe: Probe,
}

impl<W> Instrumented for InstrumentedTextWriter<W> {
    fn handle(&self) -> &ResourceHandle {
        &self.probe.handle
    }

    fn store_key(&self) -> StoreKey {
        self.probe.store
    }
}

impl<W: fmt::Write> InstrumentedTextWriter<W> {
    pub fn new(inner: W, runtime: Arc<CaptureRuntime>) -> Self {
        Self {
            inner,
            probe: Probe::new(runtime, ResourceClass::CharOutput, Direction::Response),
        }
    }

    pub fn finish(&mut self) -> Result<Option<Finalized>, RequestBlocked> {
        self.probe.finalize()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: fmt::Write> fmt::Write for InstrumentedTextWriter<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let guard = CallDepthGuard::enter(ResourceClass::CharOutput);
        self.inner.write_str(s)?;
        if guard.is_outermost() {
            self.probe.record_str(s);
        }
        Ok(())
    }
}
