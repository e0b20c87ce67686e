//! # request-policy
//!
//! Pluggable request-blocking policy for the capture-guard project. This
//! crate defines the verdict model, the evaluators that produce verdicts,
//! the [`FilterChain`] that combines them, and the background
//! [`PolicyPoller`] that keeps a remotely-managed [`PolicySnapshot`] fresh.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use request_policy::{registry, FilterRegistryConfig, RequestHeaders, SnapshotCell};
//!
//! let snapshot = Arc::new(SnapshotCell::new());
//! let chain = registry::build_chain(&FilterRegistryConfig::default(), Arc::clone(&snapshot));
//!
//! let headers: RequestHeaders = [("X-Real-IP", "10.0.0.1")].into_iter().collect();
//! let verdict = chain.evaluate(&headers, None);
//! // No snapshot fetched yet: fail open.
//! assert!(!verdict.blocked);
//! ```

mod chain;
mod headers;
pub mod ip;
pub mod loader;
mod mock;
pub mod poller;
pub mod registry;
mod snapshot;
mod verdict;

// Re-export primary public API at crate root.
pub use chain::{EvaluationRequest, FilterChain, PolicyEvaluator};
pub use headers::RequestHeaders;
pub use ip::IpAddressEvaluator;
pub use loader::SnapshotError;
pub use mock::MockEvaluator;
pub use poller::{PollError, PolicyPoller, PollerConfig};
pub use registry::{EvaluatorEntry, EvaluatorKind, FilterRegistryConfig};
pub use snapshot::{EpochMillis, PolicySnapshot, SnapshotCell, TtlEntry};
pub use verdict::{FilterVerdict, RequestBlocked, DEFAULT_BLOCKING_STATUS};
