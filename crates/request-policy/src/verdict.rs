use std::collections::BTreeMap;
use std::io;

use http::StatusCode;

/// Status code used for rejected requests unless an evaluator picks another.
pub const DEFAULT_BLOCKING_STATUS: StatusCode = StatusCode::FORBIDDEN;

/// The outcome of evaluating a request against one or more policy evaluators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    /// Whether the request must be rejected.
    pub blocked: bool,
    /// Status the adapter should answer with when `blocked` is set.
    pub status: StatusCode,
    /// Human-readable reason explaining the decision.
    pub reason: String,
    /// Diagnostic attributes recorded on the span regardless of the outcome.
    pub attributes: BTreeMap<String, String>,
}

impl Default for FilterVerdict {
    fn default() -> Self {
        Self::allow()
    }
}

impl FilterVerdict {
    /// Convenience constructor for a pass-through verdict.
    pub fn allow() -> Self {
        Self {
            blocked: false,
            status: StatusCode::OK,
            reason: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Convenience constructor for a blocking verdict with the default status.
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            status: DEFAULT_BLOCKING_STATUS,
            reason: reason.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a diagnostic attribute, consuming and returning `self` for
    /// builder-style usage.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the status code used when the verdict blocks.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Fold another evaluator's verdict into this one.
    ///
    /// Blocking is a logical OR. The first blocking verdict decides the status
    /// and reason; attributes from every verdict are kept, later keys
    /// overwriting earlier ones.
    pub fn merge(&mut self, other: FilterVerdict) {
        if other.blocked && !self.blocked {
            self.blocked = true;
            self.status = other.status;
            self.reason = other.reason;
        }
        self.attributes.extend(other.attributes);
    }
}

/// Abort signal raised when the combined verdict blocks a request.
///
/// Framework adapters catch this and turn it into a rejected response built
/// from [`status`](Self::status) and [`attributes`](Self::attributes).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request blocked with status {}: {}", .verdict.status, .verdict.reason)]
pub struct RequestBlocked {
    pub verdict: FilterVerdict,
}

impl RequestBlocked {
    pub fn new(verdict: FilterVerdict) -> Self {
        Self { verdict }
    }

    pub fn status(&self) -> StatusCode {
        self.verdict.status
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.verdict.attributes
    }

    /// Wrap the signal in an [`io::Error`] so it can cross `Read`/`Write`
    /// boundaries.
    pub fn into_io_error(self) -> io::Error {
        io::Error::other(self)
    }

    /// Recover the signal from an [`io::Error`] produced by
    /// [`into_io_error`](Self::into_io_error).
    pub fn from_io(err: &io::Error) -> Option<&RequestBlocked> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<RequestBlocked>())
    }
}
