//! Config-driven assembly of a [`FilterChain`].
//!
//! ```yaml
//! evaluators:
//!   - kind: ip_address
//!   - kind: mock
//!     enabled: false
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::{FilterChain, PolicyEvaluator};
use crate::ip::IpAddressEvaluator;
use crate::mock::MockEvaluator;
use crate::snapshot::SnapshotCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Mock,
    IpAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorEntry {
    pub kind: EvaluatorKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl EvaluatorEntry {
    pub fn enabled(kind: EvaluatorKind) -> Self {
        Self {
            kind,
            enabled: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Which evaluators make up the chain, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRegistryConfig {
    #[serde(default = "default_evaluators")]
    pub evaluators: Vec<EvaluatorEntry>,
}

impl Default for FilterRegistryConfig {
    fn default() -> Self {
        Self {
            evaluators: default_evaluators(),
        }
    }
}

fn default_evaluators() -> Vec<EvaluatorEntry> {
    vec![EvaluatorEntry::enabled(EvaluatorKind::IpAddress)]
}

/// Build the chain described by `config`. Disabled entries are skipped;
/// every IP evaluator shares `snapshot`.
pub fn build_chain(config: &FilterRegistryConfig, snapshot: Arc<SnapshotCell>) -> FilterChain {
    let mut chain = FilterChain::default();
    for entry in config.evaluators.iter().filter(|e| e.enabled) {
        let evaluator: Arc<dyn PolicyEvaluator> = match entry.kind {
            EvaluatorKind::Mock => Arc::new(MockEvaluator),
            EvaluatorKind::IpAddress => Arc::new(IpAddressEvaluator::new(Arc::clone(&snapshot))),
        };
        chain.push(evaluator);
    }
    info!(evaluators = ?chain.names(), "filter chain assembled");
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestHeaders;

    #[test]
    fn default_is_ip_only() {
        let chain = build_chain(&FilterRegistryConfig::default(), Arc::new(SnapshotCell::new()));
        assert_eq!(chain.names(), vec!["ip_address"]);
    }

    #[test]
    fn parse_yaml_and_skip_disabled() {
        let yaml = r#"
evaluators:
  - kind: mock
  - kind: ip_address
    enabled: false
"#;
        let config: FilterRegistryConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.evaluators.len(), 2);
        assert!(config.evaluators[0].enabled);

        let chain = build_chain(&config, Arc::new(SnapshotCell::new()));
        assert_eq!(chain.names(), vec!["mock"]);

        let headers: RequestHeaders = [("mockblock", "yes")].into_iter().collect();
        assert!(chain.evaluate(&headers, None).blocked);
    }

    #[test]
    fn missing_evaluators_key_uses_default() {
        let config: FilterRegistryConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config, FilterRegistryConfig::default());
    }

    #[test]
    fn empty_list_builds_permissive_chain() {
        let config = FilterRegistryConfig {
            evaluators: Vec::new(),
        };
        let chain = build_chain(&config, Arc::new(SnapshotCell::new()));
        assert!(chain.is_empty());
        assert!(!chain.evaluate(&RequestHeaders::new(), None).blocked);
    }
}
