//! Client-address extraction and allow/deny resolution.
//!
//! Candidate addresses are gathered from five header conventions and checked
//! against the active entries of the current [`PolicySnapshot`]. An allow-list
//! match always wins over a deny-list match; a request matching neither list
//! is allowed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::chain::{EvaluationRequest, PolicyEvaluator};
use crate::headers::RequestHeaders;
use crate::snapshot::{EpochMillis, PolicySnapshot, SnapshotCell};
use crate::verdict::FilterVerdict;

pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_PROXYUSER_IP: &str = "x-proxyuser-ip";
pub const FORWARDED: &str = "forwarded";
/// Peer address reported by the adapter rather than by the client.
pub const PROXY_CLIENT_ADDR: &str = "proxy.client.addr";

/// Attribute listing the allow-listed addresses that let a request through.
pub const ALLOWLISTED_ATTRIBUTE: &str = "policy.ip.allowlisted";
/// Attribute listing the deny-listed addresses that blocked a request.
pub const DENYLISTED_ATTRIBUTE: &str = "policy.ip.denylisted";

#[derive(Debug, Clone, Copy)]
enum Convention {
    Single,
    CommaSeparated,
    Structured,
}

const CONVENTIONS: [(&str, Convention); 5] = [
    (X_REAL_IP, Convention::Single),
    (X_FORWARDED_FOR, Convention::CommaSeparated),
    (X_PROXYUSER_IP, Convention::Single),
    (FORWARDED, Convention::Structured),
    (PROXY_CLIENT_ADDR, Convention::Single),
];

/// Outcome of resolving a request's addresses against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpResolution {
    /// At least one candidate is on an active allow-list entry.
    Allowlisted(BTreeSet<String>),
    /// No candidate is allow-listed and at least one is deny-listed.
    Denylisted(BTreeSet<String>),
    /// Neither list matched, or no snapshot is available.
    Unlisted,
}

/// A header carrying one address.
pub fn single_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A header carrying a comma-separated address list.
pub fn comma_separated(raw: &str) -> Vec<String> {
    raw.split(',').filter_map(single_value).collect()
}

/// A structured header of `;`-separated `key=value` pairs; only `for`
/// values are kept.
pub fn forwarded_for(raw: &str) -> Vec<String> {
    raw.split(';')
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("for") {
                single_value(value)
            } else {
                None
            }
        })
        .collect()
}

/// Union of the candidate client addresses across all conventions.
pub fn candidate_ips(headers: &RequestHeaders) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    for (name, convention) in CONVENTIONS {
        let Some(raw) = headers.get(name) else {
            continue;
        };
        match convention {
            Convention::Single => candidates.extend(single_value(raw)),
            Convention::CommaSeparated => candidates.extend(comma_separated(raw)),
            Convention::Structured => candidates.extend(forwarded_for(raw)),
        }
    }
    candidates
}

/// Resolve `headers` against `snapshot` at time `now`.
pub fn resolve_at(
    snapshot: Option<&PolicySnapshot>,
    headers: &RequestHeaders,
    now: EpochMillis,
) -> IpResolution {
    let Some(snapshot) = snapshot else {
        return IpResolution::Unlisted;
    };
    let candidates = candidate_ips(headers);
    if candidates.is_empty() {
        return IpResolution::Unlisted;
    }

    let allowed = snapshot.active_allowed(now);
    let matched: BTreeSet<String> = candidates
        .iter()
        .filter(|ip| allowed.contains(ip.as_str()))
        .cloned()
        .collect();
    if !matched.is_empty() {
        return IpResolution::Allowlisted(matched);
    }

    let denied = snapshot.active_denied(now);
    let matched: BTreeSet<String> = candidates
        .into_iter()
        .filter(|ip| denied.contains(ip.as_str()))
        .collect();
    if !matched.is_empty() {
        return IpResolution::Denylisted(matched);
    }

    IpResolution::Unlisted
}

/// Returns `false` only when a request is deny-listed and not allow-listed.
pub fn allow(snapshot: Option<&PolicySnapshot>, headers: &RequestHeaders) -> bool {
    allow_at(snapshot, headers, now_millis())
}

pub fn allow_at(
    snapshot: Option<&PolicySnapshot>,
    headers: &RequestHeaders,
    now: EpochMillis,
) -> bool {
    !matches!(resolve_at(snapshot, headers, now), IpResolution::Denylisted(_))
}

fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

fn join(ips: &BTreeSet<String>) -> String {
    ips.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Evaluator backed by the remotely-polled snapshot.
#[derive(Debug, Clone)]
pub struct IpAddressEvaluator {
    snapshot: Arc<SnapshotCell>,
}

impl IpAddressEvaluator {
    pub fn new(snapshot: Arc<SnapshotCell>) -> Self {
        Self { snapshot }
    }
}

impl PolicyEvaluator for IpAddressEvaluator {
    fn name(&self) -> &str {
        "ip_address"
    }

    fn evaluate(&self, request: &EvaluationRequest<'_>) -> FilterVerdict {
        let snapshot = self.snapshot.load();
        match resolve_at(snapshot.as_deref(), request.headers, now_millis()) {
            IpResolution::Allowlisted(ips) => {
                FilterVerdict::allow().with_attribute(ALLOWLISTED_ATTRIBUTE, join(&ips))
            }
            IpResolution::Denylisted(ips) => {
                debug!(ips = %join(&ips), "client address is deny-listed");
                FilterVerdict::block("client address is deny-listed")
                    .with_attribute(DENYLISTED_ATTRIBUTE, join(&ips))
            }
            IpResolution::Unlisted => FilterVerdict::allow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TtlEntry;

    const NOW: EpochMillis = 1_700_000_000_000;
    const FUTURE: EpochMillis = NOW + 60_000;
    const PAST: EpochMillis = NOW - 60_000;

    fn headers(pairs: &[(&str, &str)]) -> RequestHeaders {
        pairs.iter().copied().collect()
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    // ---- extraction ----

    #[test]
    fn single_value_trims_and_drops_blank() {
        assert_eq!(single_value(" 10.0.0.1 "), Some("10.0.0.1".to_string()));
        assert_eq!(single_value(""), None);
        assert_eq!(single_value("   \t"), None);
    }

    #[test]
    fn comma_separated_keeps_every_segment() {
        assert_eq!(
            comma_separated("10.0.0.1, 10.0.0.2 ,, ,10.0.0.3"),
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
        assert!(comma_separated(" , ,").is_empty());
    }

    #[test]
    fn forwarded_for_trims_and_ignores_other_keys() {
        assert_eq!(
            forwarded_for("for= 203.0.113.5 ;proto=https"),
            vec!["203.0.113.5"]
        );
        assert_eq!(forwarded_for("FOR=198.51.100.1;by=proxy"), vec!["198.51.100.1"]);
        assert!(forwarded_for("proto=https;by=10.0.0.9").is_empty());
        assert!(forwarded_for("for=  ;for").is_empty());
    }

    #[test]
    fn candidates_union_across_conventions() {
        let h = headers(&[
            ("X-Real-IP", "10.0.0.1"),
            ("X-Forwarded-For", "10.0.0.2, 10.0.0.1"),
            ("X-ProxyUser-Ip", "10.0.0.3"),
            ("Forwarded", "for=10.0.0.4;proto=http"),
            ("proxy.client.addr", "10.0.0.5"),
        ]);
        assert_eq!(
            candidate_ips(&h),
            set(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"])
        );
    }

    #[test]
    fn whitespace_only_headers_contribute_nothing() {
        let h = headers(&[
            ("x-real-ip", "  "),
            ("x-forwarded-for", " , "),
            ("x-proxyuser-ip", ""),
            ("forwarded", "for= ;proto=https"),
            ("proxy.client.addr", "\t"),
        ]);
        assert!(candidate_ips(&h).is_empty());
    }

    // ---- resolution ----

    #[test]
    fn allow_list_takes_precedence_over_deny_list() {
        let snapshot = PolicySnapshot::new(
            vec![TtlEntry::new(["10.0.0.1"], FUTURE)],
            vec![TtlEntry::new(["10.0.0.1"], FUTURE)],
        );
        let h = headers(&[("x-real-ip", "10.0.0.1")]);
        assert!(allow_at(Some(&snapshot), &h, NOW));
        assert_eq!(
            resolve_at(Some(&snapshot), &h, NOW),
            IpResolution::Allowlisted(set(&["10.0.0.1"]))
        );
    }

    #[test]
    fn active_deny_entry_blocks() {
        let snapshot = PolicySnapshot::new(Vec::new(), vec![TtlEntry::new(["10.0.0.2"], FUTURE)]);
        let h = headers(&[("x-forwarded-for", "10.0.0.2")]);
        assert!(!allow_at(Some(&snapshot), &h, NOW));
    }

    #[test]
    fn expired_deny_entry_is_inert() {
        let snapshot = PolicySnapshot::new(Vec::new(), vec![TtlEntry::new(["10.0.0.2"], PAST)]);
        let h = headers(&[("x-real-ip", "10.0.0.2")]);
        assert!(allow_at(Some(&snapshot), &h, NOW));
    }

    #[test]
    fn expired_allow_entry_does_not_shield_deny() {
        let snapshot = PolicySnapshot::new(
            vec![TtlEntry::new(["10.0.0.1"], PAST)],
            vec![TtlEntry::permanent(["10.0.0.1"])],
        );
        let h = headers(&[("x-real-ip", "10.0.0.1")]);
        assert!(!allow_at(Some(&snapshot), &h, NOW));
    }

    #[test]
    fn allowlisted_candidate_shields_other_denied_candidate() {
        let snapshot = PolicySnapshot::new(
            vec![TtlEntry::permanent(["10.0.0.1"])],
            vec![TtlEntry::permanent(["10.0.0.9"])],
        );
        let h = headers(&[("x-forwarded-for", "10.0.0.9, 10.0.0.1")]);
        assert!(allow_at(Some(&snapshot), &h, NOW));
    }

    #[test]
    fn no_snapshot_fails_open() {
        let h = headers(&[("x-real-ip", "10.0.0.2")]);
        assert!(allow_at(None, &h, NOW));
    }

    #[test]
    fn no_candidates_fails_open() {
        let snapshot = PolicySnapshot::new(Vec::new(), vec![TtlEntry::permanent(["10.0.0.2"])]);
        assert!(allow_at(Some(&snapshot), &RequestHeaders::new(), NOW));
    }

    // ---- evaluator ----

    #[test]
    fn evaluator_blocks_with_denylisted_attribute() {
        let cell = Arc::new(SnapshotCell::with_snapshot(PolicySnapshot::new(
            Vec::new(),
            vec![TtlEntry::permanent(["192.0.2.7"])],
        )));
        let evaluator = IpAddressEvaluator::new(cell);
        let h = headers(&[("forwarded", "for=192.0.2.7")]);
        let verdict = evaluator.evaluate(&EvaluationRequest {
            headers: &h,
            body: None,
        });
        assert!(verdict.blocked);
        assert_eq!(
            verdict.attributes.get(DENYLISTED_ATTRIBUTE).map(String::as_str),
            Some("192.0.2.7")
        );
    }

    #[test]
    fn evaluator_reads_latest_snapshot() {
        let cell = Arc::new(SnapshotCell::new());
        let evaluator = IpAddressEvaluator::new(Arc::clone(&cell));
        let h = headers(&[("x-real-ip", "192.0.2.7")]);
        let request = EvaluationRequest {
            headers: &h,
            body: None,
        };
        assert!(!evaluator.evaluate(&request).blocked);

        cell.store(PolicySnapshot::new(
            Vec::new(),
            vec![TtlEntry::permanent(["192.0.2.7"])],
        ));
        assert!(evaluator.evaluate(&request).blocked);
    }
}
