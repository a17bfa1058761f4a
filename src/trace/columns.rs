//! Derived per-event columns and their dependency graph.
//!
//! Derived columns are projections over a stream's events. Each one is stored
//! together with the structural version of the stream it was computed from
//! and the name-check mode of the pairing behind it. A column whose version
//! is behind the stream's is treated as absent; a column built under another
//! mode is stale for callers asking for that mode.

use crate::utils::config::NameCheck;
use std::collections::BTreeMap;
use std::fmt;

/// Enter/Leave pairing, indexed by event position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchColumns {
    pub matching_index: Vec<Option<usize>>,
    pub matching_timestamp: Vec<Option<i64>>,
}

impl MatchColumns {
    pub fn with_len(len: usize) -> Self {
        Self {
            matching_index: vec![None; len],
            matching_timestamp: vec![None; len],
        }
    }

    pub fn matched_pairs(&self) -> usize {
        self.matching_index.iter().filter(|m| m.is_some()).count() / 2
    }
}

/// Calling-context tree over Enter rows
///
/// `children` and `depth` are `Some` exactly on Enter rows, `parent` is
/// `Some` on Enter rows that have a caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallTree {
    pub parent: Vec<Option<usize>>,
    pub children: Vec<Option<Vec<usize>>>,
    pub depth: Vec<Option<u32>>,
}

impl CallTree {
    pub fn with_len(len: usize) -> Self {
        Self {
            parent: vec![None; len],
            children: vec![None; len],
            depth: vec![None; len],
        }
    }

    /// Enter rows without a caller
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.depth
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Some(0))
            .map(|(i, _)| i)
    }
}

/// One inclusive or exclusive metric, Enter rows only
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricColumn {
    pub values: Vec<Option<f64>>,
    /// Set when at least one direct child had no inclusive value
    pub partial: Vec<bool>,
}

impl MetricColumn {
    pub fn with_len(len: usize) -> Self {
        Self {
            values: vec![None; len],
            partial: vec![false; len],
        }
    }
}

/// Identifies a derived column for dependency resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DerivedColumn {
    Matching,
    CallTree,
    Inclusive(String),
    Exclusive(String),
}

impl DerivedColumn {
    /// Columns that must be fresh before this one can be computed
    pub fn prerequisites(&self) -> Vec<DerivedColumn> {
        match self {
            Self::Matching | Self::CallTree => Vec::new(),
            Self::Inclusive(_) => vec![Self::Matching],
            Self::Exclusive(metric) => vec![Self::Inclusive(metric.clone()), Self::CallTree],
        }
    }
}

impl fmt::Display for DerivedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matching => f.write_str("_matching_event"),
            Self::CallTree => f.write_str("_parent"),
            Self::Inclusive(metric) => write!(f, "{}.inc", metric),
            Self::Exclusive(metric) => write!(f, "{}.exc", metric),
        }
    }
}

#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    mode: NameCheck,
    value: T,
}

/// Cache of derived columns keyed by structural version and pairing mode
#[derive(Debug, Clone, Default)]
pub struct DerivedStore {
    matching: Option<Versioned<MatchColumns>>,
    call_tree: Option<Versioned<CallTree>>,
    inclusive: BTreeMap<String, Versioned<MetricColumn>>,
    exclusive: BTreeMap<String, Versioned<MetricColumn>>,
}

impl DerivedStore {
    /// Fresh for the version, whatever mode built it
    pub fn is_fresh(&self, column: &DerivedColumn, version: u64) -> bool {
        self.entry_mode(column, version).is_some()
    }

    /// Fresh for the version and built under `mode`
    ///
    /// Metric columns carry the mode of the pairing they were derived from.
    pub fn is_fresh_for(&self, column: &DerivedColumn, version: u64, mode: NameCheck) -> bool {
        self.entry_mode(column, version) == Some(mode)
    }

    fn entry_mode(&self, column: &DerivedColumn, version: u64) -> Option<NameCheck> {
        match column {
            DerivedColumn::Matching => current(self.matching.as_ref(), version).map(|v| v.mode),
            DerivedColumn::CallTree => current(self.call_tree.as_ref(), version).map(|v| v.mode),
            DerivedColumn::Inclusive(m) => current(self.inclusive.get(m), version).map(|v| v.mode),
            DerivedColumn::Exclusive(m) => current(self.exclusive.get(m), version).map(|v| v.mode),
        }
    }

    pub fn matching(&self, version: u64) -> Option<&MatchColumns> {
        fresh(self.matching.as_ref(), version)
    }

    pub fn call_tree(&self, version: u64) -> Option<&CallTree> {
        fresh(self.call_tree.as_ref(), version)
    }

    pub fn inclusive(&self, metric: &str, version: u64) -> Option<&MetricColumn> {
        fresh(self.inclusive.get(metric), version)
    }

    pub fn exclusive(&self, metric: &str, version: u64) -> Option<&MetricColumn> {
        fresh(self.exclusive.get(metric), version)
    }

    /// Metric names with a fresh exclusive column
    pub fn exclusive_metrics(&self, version: u64) -> Vec<String> {
        self.exclusive
            .iter()
            .filter(|(_, v)| v.version == version)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Store a pairing; dependent metric columns are dropped if it changed
    pub fn set_matching(&mut self, value: MatchColumns, version: u64, mode: NameCheck) {
        if self.matching(version) != Some(&value) {
            self.inclusive.clear();
            self.exclusive.clear();
        }
        self.matching = Some(Versioned { version, mode, value });
    }

    /// Store a tree; exclusive columns are dropped if it changed
    pub fn set_call_tree(&mut self, value: CallTree, version: u64, mode: NameCheck) {
        if self.call_tree(version) != Some(&value) {
            self.exclusive.clear();
        }
        self.call_tree = Some(Versioned { version, mode, value });
    }

    pub fn set_inclusive(&mut self, metric: &str, value: MetricColumn, version: u64, mode: NameCheck) {
        if self.inclusive(metric, version) != Some(&value) {
            self.exclusive.remove(metric);
        }
        self.inclusive
            .insert(metric.to_string(), Versioned { version, mode, value });
    }

    pub fn set_exclusive(&mut self, metric: &str, value: MetricColumn, version: u64, mode: NameCheck) {
        self.exclusive
            .insert(metric.to_string(), Versioned { version, mode, value });
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of stored column sets, fresh or not
    pub fn len(&self) -> usize {
        self.matching.is_some() as usize
            + self.call_tree.is_some() as usize
            + self.inclusive.len()
            + self.exclusive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn current<T>(slot: Option<&Versioned<T>>, version: u64) -> Option<&Versioned<T>> {
    slot.filter(|v| v.version == version)
}

fn fresh<T>(slot: Option<&Versioned<T>>, version: u64) -> Option<&T> {
    current(slot, version).map(|v| &v.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisites() {
        assert!(DerivedColumn::Matching.prerequisites().is_empty());
        assert_eq!(
            DerivedColumn::Inclusive("time".into()).prerequisites(),
            vec![DerivedColumn::Matching]
        );
        assert_eq!(
            DerivedColumn::Exclusive("time".into()).prerequisites(),
            vec![
                DerivedColumn::Inclusive("time".into()),
                DerivedColumn::CallTree
            ]
        );
    }

    #[test]
    fn test_stale_version_reads_as_absent() {
        let mut store = DerivedStore::default();
        store.set_matching(MatchColumns::with_len(2), 1, NameCheck::Off);

        assert!(store.matching(1).is_some());
        assert!(store.matching(2).is_none());
        assert!(!store.is_fresh(&DerivedColumn::Matching, 2));
    }

    #[test]
    fn test_changed_matching_drops_dependents() {
        let mut store = DerivedStore::default();
        store.set_matching(MatchColumns::with_len(2), 0, NameCheck::Off);
        store.set_inclusive("time", MetricColumn::with_len(2), 0, NameCheck::Off);

        // Same pairing again keeps the metric
        store.set_matching(MatchColumns::with_len(2), 0, NameCheck::Off);
        assert!(store.inclusive("time", 0).is_some());

        let mut changed = MatchColumns::with_len(2);
        changed.matching_index = vec![Some(1), Some(0)];
        store.set_matching(changed, 0, NameCheck::Off);
        assert!(store.inclusive("time", 0).is_none());
    }

    #[test]
    fn test_other_mode_reads_as_stale() {
        let mut store = DerivedStore::default();
        store.set_matching(MatchColumns::with_len(2), 0, NameCheck::Off);
        store.set_call_tree(CallTree::with_len(2), 0, NameCheck::Strict);

        assert!(store.is_fresh(&DerivedColumn::Matching, 0));
        assert!(store.is_fresh_for(&DerivedColumn::Matching, 0, NameCheck::Off));
        assert!(!store.is_fresh_for(&DerivedColumn::Matching, 0, NameCheck::Recover));
        assert!(store.is_fresh_for(&DerivedColumn::CallTree, 0, NameCheck::Strict));
        assert!(!store.is_fresh_for(&DerivedColumn::CallTree, 1, NameCheck::Strict));
        assert!(!store.is_fresh_for(&DerivedColumn::Inclusive("time".into()), 0, NameCheck::Off));
    }

    #[test]
    fn test_column_display_names() {
        assert_eq!(DerivedColumn::Inclusive("time".into()).to_string(), "time.inc");
        assert_eq!(DerivedColumn::Exclusive("flops".into()).to_string(), "flops.exc");
    }
}
