use std::sync::Arc;

use tracing::{debug, trace};

use crate::headers::RequestHeaders;
use crate::verdict::FilterVerdict;

/// Everything an evaluator may look at for one request.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub headers: &'a RequestHeaders,
    /// Captured body; `None` at the header stage.
    pub body: Option<&'a str>,
}

/// A pluggable source of blocking decisions.
///
/// Evaluators run on request-handling threads and must not perform I/O;
/// remote state is read from an already-fetched snapshot.
pub trait PolicyEvaluator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn evaluate(&self, request: &EvaluationRequest<'_>) -> FilterVerdict;
}

/// Ordered set of evaluators whose verdicts are combined into one.
///
/// Every evaluator runs; the request is blocked if any of them blocks, and
/// attributes from all of them are kept for observability. Allow/deny
/// precedence is decided inside each evaluator, never across evaluators.
#[derive(Clone, Default)]
pub struct FilterChain {
    evaluators: Vec<Arc<dyn PolicyEvaluator>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("evaluators", &self.names())
            .finish()
    }
}

impl FilterChain {
    pub fn new(evaluators: Vec<Arc<dyn PolicyEvaluator>>) -> Self {
        Self { evaluators }
    }

    pub fn push(&mut self, evaluator: Arc<dyn PolicyEvaluator>) {
        self.evaluators.push(evaluator);
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    /// Run every evaluator and combine their verdicts.
    pub fn evaluate(&self, headers: &RequestHeaders, body: Option<&str>) -> FilterVerdict {
        let request = EvaluationRequest { headers, body };
        let mut combined = FilterVerdict::allow();

        for evaluator in &self.evaluators {
            let verdict = evaluator.evaluate(&request);
            trace!(
                evaluator = evaluator.name(),
                blocked = verdict.blocked,
                "evaluator verdict"
            );
            combined.merge(verdict);
        }

        debug!(
            blocked = combined.blocked,
            evaluators = self.evaluators.len(),
            has_body = body.is_some(),
            "request evaluated against filter chain"
        );
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        verdict: FilterVerdict,
    }

    impl PolicyEvaluator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn evaluate(&self, _request: &EvaluationRequest<'_>) -> FilterVerdict {
            self.verdict.clone()
        }
    }

    fn fixed(name: &'static str, verdict: FilterVerdict) -> Arc<dyn PolicyEvaluator> {
        Arc::new(Fixed { name, verdict })
    }

    #[test]
    fn empty_chain_allows() {
        let chain = FilterChain::default();
        assert!(!chain.evaluate(&RequestHeaders::new(), None).blocked);
    }

    #[test]
    fn any_block_blocks() {
        let chain = FilterChain::new(vec![
            fixed("allow", FilterVerdict::allow()),
            fixed("block", FilterVerdict::block("blocked by second")),
        ]);
        let verdict = chain.evaluate(&RequestHeaders::new(), Some("{}"));
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, "blocked by second");
    }

    #[test]
    fn earlier_allow_attribute_does_not_override_later_block() {
        let chain = FilterChain::new(vec![
            fixed(
                "allowlisted",
                FilterVerdict::allow().with_attribute("policy.allowlisted", "10.0.0.1"),
            ),
            fixed("deny", FilterVerdict::block("denied")),
        ]);
        let verdict = chain.evaluate(&RequestHeaders::new(), None);
        assert!(verdict.blocked);
        assert_eq!(
            verdict.attributes.get("policy.allowlisted").map(String::as_str),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn attributes_merged_when_not_blocked() {
        let chain = FilterChain::new(vec![
            fixed("a", FilterVerdict::allow().with_attribute("a", "1")),
            fixed("b", FilterVerdict::allow().with_attribute("b", "2")),
        ]);
        let verdict = chain.evaluate(&RequestHeaders::new(), None);
        assert!(!verdict.blocked);
        assert_eq!(verdict.attributes.len(), 2);
    }

    #[test]
    fn debug_lists_evaluator_names() {
        let chain = FilterChain::new(vec![fixed("one", FilterVerdict::allow())]);
        assert!(format!("{chain:?}").contains("one"));
    }
}
