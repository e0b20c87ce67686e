use crate::chain::{EvaluationRequest, PolicyEvaluator};
use crate::verdict::FilterVerdict;

/// Header whose presence makes [`MockEvaluator`] block.
pub const MOCK_BLOCK_HEADER: &str = "mockblock";

/// Attribute recorded when the mock evaluator blocks.
pub const MOCK_RESULT_ATTRIBUTE: &str = "filter.mock.result";

/// Static evaluator for tests and smoke checks: blocks any request carrying
/// a `mockblock` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEvaluator;

impl PolicyEvaluator for MockEvaluator {
    fn name(&self) -> &str {
        "mock"
    }

    fn evaluate(&self, request: &EvaluationRequest<'_>) -> FilterVerdict {
        if request.headers.contains(MOCK_BLOCK_HEADER) {
            return FilterVerdict::block(format!("header '{MOCK_BLOCK_HEADER}' found"))
                .with_attribute(MOCK_RESULT_ATTRIBUTE, "true");
        }
        FilterVerdict::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestHeaders;

    #[test]
    fn blocks_on_mockblock_header() {
        let headers: RequestHeaders = [("MockBlock", "1")].into_iter().collect();
        let verdict = MockEvaluator.evaluate(&EvaluationRequest {
            headers: &headers,
            body: None,
        });
        assert!(verdict.blocked);
        assert_eq!(
            verdict.attributes.get(MOCK_RESULT_ATTRIBUTE).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn allows_without_header() {
        let headers = RequestHeaders::new();
        let verdict = MockEvaluator.evaluate(&EvaluationRequest {
            headers: &headers,
            body: Some("mockblock"),
        });
        assert!(!verdict.blocked);
    }
}
