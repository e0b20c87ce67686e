use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, as delivered by the policy endpoint.
pub type EpochMillis = i64;

/// A set of values paired with an expiry timestamp.
///
/// An entry without `expiry` never expires. Once `expiry` is in the past the
/// entry is inert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlEntry {
    #[serde(default, alias = "ipAddress")]
    pub values: BTreeSet<String>,
    #[serde(default, rename = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<EpochMillis>,
}

impl TtlEntry {
    pub fn new<I, S>(values: I, expires_at: EpochMillis) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            expires_at: Some(expires_at),
        }
    }

    pub fn permanent<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            expires_at: None,
        }
    }

    /// Returns `true` while the entry has not yet expired at `now`.
    pub fn is_active(&self, now: EpochMillis) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

/// Immutable view of remotely-managed allow/deny lists.
///
/// A snapshot is never mutated after publication; the poller replaces it
/// wholesale through a [`SnapshotCell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub fetched_at: DateTime<Utc>,
    pub allow_list: Vec<TtlEntry>,
    pub deny_list: Vec<TtlEntry>,
}

impl PolicySnapshot {
    pub fn new(allow_list: Vec<TtlEntry>, deny_list: Vec<TtlEntry>) -> Self {
        Self {
            fetched_at: Utc::now(),
            allow_list,
            deny_list,
        }
    }

    /// Union of the values of all allow-list entries still active at `now`.
    pub fn active_allowed(&self, now: EpochMillis) -> HashSet<&str> {
        active_values(&self.allow_list, now)
    }

    /// Union of the values of all deny-list entries still active at `now`.
    pub fn active_denied(&self, now: EpochMillis) -> HashSet<&str> {
        active_values(&self.deny_list, now)
    }
}

fn active_values(entries: &[TtlEntry], now: EpochMillis) -> HashSet<&str> {
    entries
        .iter()
        .filter(|entry| entry.is_active(now))
        .flat_map(|entry| entry.values.iter().map(String::as_str))
        .collect()
}

/// Atomically swappable holder for the current [`PolicySnapshot`].
///
/// Readers get a consistent `Arc` to a fully constructed snapshot; the
/// writer publishes a replacement with a single swap. `None` means no
/// snapshot has been fetched yet.
#[derive(Debug)]
pub struct SnapshotCell {
    current: ArcSwapOption<PolicySnapshot>,
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn with_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Option<Arc<PolicySnapshot>> {
        self.current.load_full()
    }

    /// Publish `snapshot`, returning the one it superseded.
    pub fn store(&self, snapshot: PolicySnapshot) -> Option<Arc<PolicySnapshot>> {
        self.publish(Arc::new(snapshot))
    }

    pub fn publish(&self, snapshot: Arc<PolicySnapshot>) -> Option<Arc<PolicySnapshot>> {
        self.current.swap(Some(snapshot))
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_without_expiry_is_permanent() {
        let entry = TtlEntry::permanent(["10.0.0.1"]);
        assert!(entry.is_active(i64::MAX));
    }

    #[test]
    fn entry_expires_at_its_timestamp() {
        let entry = TtlEntry::new(["10.0.0.1"], 1_000);
        assert!(entry.is_active(999));
        assert!(!entry.is_active(1_000));
        assert!(!entry.is_active(1_001));
    }

    #[test]
    fn active_sets_skip_expired_entries() {
        let snapshot = PolicySnapshot::new(
            vec![TtlEntry::new(["a", "b"], 100), TtlEntry::new(["c"], 10)],
            vec![TtlEntry::permanent(["d"])],
        );
        let allowed = snapshot.active_allowed(50);
        assert!(allowed.contains("a"));
        assert!(allowed.contains("b"));
        assert!(!allowed.contains("c"));
        assert_eq!(snapshot.active_denied(50).len(), 1);
    }

    #[test]
    fn entry_accepts_ip_address_alias() {
        let entry: TtlEntry =
            serde_json::from_str(r#"{"ipAddress": ["1.1.1.1"], "expiry": 5}"#).unwrap();
        assert!(entry.values.contains("1.1.1.1"));
        assert_eq!(entry.expires_at, Some(5));
    }

    #[test]
    fn cell_starts_empty_and_swaps_whole_snapshots() {
        let cell = SnapshotCell::new();
        assert!(cell.is_empty());
        assert!(cell.load().is_none());

        let first = PolicySnapshot::new(vec![TtlEntry::permanent(["a"])], Vec::new());
        assert!(cell.store(first.clone()).is_none());

        let held = cell.load().expect("snapshot published");
        let second = PolicySnapshot::new(Vec::new(), vec![TtlEntry::permanent(["b"])]);
        let previous = cell.store(second).expect("previous snapshot returned");

        // Readers holding the old Arc keep a consistent view.
        assert_eq!(*held, first);
        assert_eq!(*previous, first);
        assert_eq!(cell.load().unwrap().deny_list.len(), 1);
    }
}
