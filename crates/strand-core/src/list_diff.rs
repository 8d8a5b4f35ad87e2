#![forbid(unsafe_code)]

//! Keyed list reconciliation with stable element identity.
//!
//! # Design
//!
//! [`ListDiffer::diff`] compares two list snapshots and assigns each element
//! of the new list a [`ListIndex`]. Elements that survive keep their previous
//! identity (their `index` is updated in place when they move); everything
//! else gets a fresh identity.
//!
//! Values are matched with strict equality ([`Value::strict_key`]): primitives
//! by value, lists and records by identity. Duplicates are matched through a
//! FIFO queue of old positions per value, so repeated values keep a
//! deterministic, order-stable identity assignment.
//!
//! # Invariants
//!
//! 1. `diff(p, L, L)` returns empty `added`/`changed`/`deleted` and shares the
//!    same `new_indexes` slice as `old_indexes`.
//! 2. Every old index is either reused in `new_indexes` or listed in `deleted`.
//! 3. `changed` lists exactly the reused indexes whose position moved.
//! 4. Results are memoized per (parent, old identity, new identity).
//!
//! # Complexity
//!
//! Linear in `old.len() + new.len()` with amortized O(1) queue operations.

use std::collections::VecDeque;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::list_index::{ListIndex, ListIndexId};
use crate::value::{List, NodeId, StrictKey, Value};

/// Default number of memoized diff results kept before the memo is reset.
pub const DEFAULT_MEMO_CAPACITY: usize = 4096;

/// Which index set of a diff a walk expands into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SearchKind {
    /// Indexes before the change.
    Old,
    /// Indexes after the change.
    #[default]
    New,
    /// Freshly created indexes.
    Add,
    /// Reused indexes whose position moved.
    Change,
    /// Indexes that no longer exist.
    Delete,
}

impl SearchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        }
    }

    /// Parse the lowercase name used in configuration.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "old" => Some(Self::Old),
            "new" => Some(Self::New),
            "add" => Some(Self::Add),
            "change" => Some(Self::Change),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Result of diffing two list snapshots.
#[derive(Debug, Clone)]
pub struct ListDiff {
    pub old_indexes: Rc<[ListIndex]>,
    pub new_indexes: Rc<[ListIndex]>,
    pub added: Vec<ListIndex>,
    pub changed: Vec<ListIndex>,
    pub deleted: Vec<ListIndex>,
}

impl ListDiff {
    /// Whether nothing was added, moved or deleted.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// The index set selected by `kind`.
    #[must_use]
    pub fn select(&self, kind: SearchKind) -> &[ListIndex] {
        match kind {
            SearchKind::Old => &self.old_indexes,
            SearchKind::New => &self.new_indexes,
            SearchKind::Add => &self.added,
            SearchKind::Change => &self.changed,
            SearchKind::Delete => &self.deleted,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub computed: u64,
    pub memo_hits: u64,
    pub memo_resets: u64,
}

type ParentKey = Option<ListIndexId>;

/// Diff engine with per-list index tables and a memo of results.
#[derive(Debug)]
pub struct ListDiffer {
    memo: AHashMap<(ParentKey, NodeId, NodeId), Rc<ListDiff>>,
    indexes: AHashMap<(ParentKey, NodeId), Rc<[ListIndex]>>,
    memo_capacity: usize,
    stats: DiffStats,
}

impl Default for ListDiffer {
    fn default() -> Self {
        Self::with_memo_capacity(DEFAULT_MEMO_CAPACITY)
    }
}

fn fresh_indexes(parent: Option<&ListIndex>, len: usize) -> Rc<[ListIndex]> {
    (0..len).map(|i| ListIndex::new(parent, i)).collect()
}

impl ListDiffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_memo_capacity(memo_capacity: usize) -> Self {
        Self {
            memo: AHashMap::new(),
            indexes: AHashMap::new(),
            memo_capacity: memo_capacity.max(1),
            stats: DiffStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> DiffStats {
        self.stats
    }

    /// Index table recorded for `list` under `parent`, if any.
    #[must_use]
    pub fn indexes_of(&self, parent: Option<&ListIndex>, list: &List) -> Option<Rc<[ListIndex]>> {
        self.indexes
            .get(&(parent.map(ListIndex::id), list.id()))
            .cloned()
    }

    /// Index table for `list`, created with fresh identities when unseen.
    pub fn live_indexes(&mut self, parent: Option<&ListIndex>, list: &List) -> Rc<[ListIndex]> {
        let key = (parent.map(ListIndex::id), list.id());
        Rc::clone(
            self.indexes
                .entry(key)
                .or_insert_with(|| fresh_indexes(parent, list.len())),
        )
    }

    /// Diff `old` against `new` under the loop position `parent`.
    ///
    /// `None` and non-list values are treated as empty lists.
    pub fn diff(
        &mut self,
        parent: Option<&ListIndex>,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Rc<ListDiff> {
        let old = old.and_then(Value::as_list);
        let new = new.and_then(Value::as_list);
        let parent_key = parent.map(ListIndex::id);

        if let (Some(o), Some(n)) = (old, new)
            && let Some(hit) = self.memo.get(&(parent_key, o.id(), n.id()))
        {
            self.stats.memo_hits += 1;
            return Rc::clone(hit);
        }

        let old_indexes: Rc<[ListIndex]> = match old {
            Some(o) => self.live_indexes(parent, o),
            None => Rc::from(Vec::new()),
        };
        let result = Rc::new(compute(parent, &old_indexes, old, new));
        self.stats.computed += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            message = "strand.diff",
            added = result.added.len(),
            changed = result.changed.len(),
            deleted = result.deleted.len()
        );

        if let Some(n) = new {
            self.indexes
                .insert((parent_key, n.id()), Rc::clone(&result.new_indexes));
        }
        if let (Some(o), Some(n)) = (old, new) {
            if self.memo.len() >= self.memo_capacity {
                self.memo.clear();
                self.stats.memo_resets += 1;
            }
            self.memo
                .insert((parent_key, o.id(), n.id()), Rc::clone(&result));
        }
        result
    }

    /// Drop every table entry owned by list identities rejected by `keep`.
    pub fn retain_lists(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        self.indexes.retain(|(_, list), _| keep(*list));
        self.memo.retain(|(_, o, n), _| keep(*o) && keep(*n));
    }

    /// Drop every table entry nested under `parent` (or one of its descendants).
    pub fn forget_parent(&mut self, parent: &ListIndex) {
        self.forget_parents(&[parent.id()].into_iter().collect());
    }

    /// Drop every table entry nested under one of `parents`, in one pass
    /// over each table.
    pub fn forget_parents(&mut self, parents: &AHashSet<ListIndexId>) {
        if parents.is_empty() {
            return;
        }
        let nested = |key: &ParentKey, indexes_parent: Option<&ListIndex>| {
            key.is_some() && indexes_parent.is_some_and(|p| p.descends_from_any(parents))
        };
        self.indexes
            .retain(|(key, _), v| !nested(key, v.first().and_then(ListIndex::parent)));
        self.memo.retain(|(key, _, _), d| {
            let sample = d.new_indexes.first().or(d.old_indexes.first());
            !nested(key, sample.and_then(ListIndex::parent))
        });
    }

    pub fn clear(&mut self) {
        self.memo.clear();
        self.indexes.clear();
    }
}

fn compute(
    parent: Option<&ListIndex>,
    old_indexes: &Rc<[ListIndex]>,
    old: Option<&List>,
    new: Option<&List>,
) -> ListDiff {
    let new_items = new.map_or(&[][..], List::as_slice);
    let old_items = old.map_or(&[][..], List::as_slice);

    if new_items.is_empty() {
        return ListDiff {
            old_indexes: Rc::clone(old_indexes),
            new_indexes: Rc::from(Vec::new()),
            added: Vec::new(),
            changed: Vec::new(),
            deleted: old_indexes.to_vec(),
        };
    }

    if old_items.is_empty() {
        let new_indexes = fresh_indexes(parent, new_items.len());
        return ListDiff {
            old_indexes: Rc::clone(old_indexes),
            added: new_indexes.to_vec(),
            new_indexes,
            changed: Vec::new(),
            deleted: Vec::new(),
        };
    }

    if old_items.len() == new_items.len()
        && old_items.iter().zip(new_items).all(|(a, b)| a.strict_eq(b))
    {
        return ListDiff {
            old_indexes: Rc::clone(old_indexes),
            new_indexes: Rc::clone(old_indexes),
            added: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
        };
    }

    let mut buckets: AHashMap<StrictKey, VecDeque<usize>> = AHashMap::new();
    for (position, value) in old_items.iter().enumerate() {
        buckets
            .entry(value.strict_key())
            .or_default()
            .push_back(position);
    }

    let mut used = vec![false; old_items.len()];
    let mut new_indexes = Vec::with_capacity(new_items.len());
    let mut added = Vec::new();
    let mut changed = Vec::new();

    for (position, value) in new_items.iter().enumerate() {
        let reused = buckets
            .get_mut(&value.strict_key())
            .and_then(VecDeque::pop_front);
        match reused {
            Some(old_position) => {
                used[old_position] = true;
                let li = old_indexes[old_position].clone();
                if li.index() != position {
                    li.set_index(position);
                    changed.push(li.clone());
                }
                new_indexes.push(li);
            }
            None => {
                let li = ListIndex::new(parent, position);
                added.push(li.clone());
                new_indexes.push(li);
            }
        }
    }

    let deleted = used
        .iter()
        .zip(old_indexes.iter())
        .filter(|(used, _)| !**used)
        .map(|(_, li)| li.clone())
        .collect();

    ListDiff {
        old_indexes: Rc::clone(old_indexes),
        new_indexes: Rc::from(new_indexes),
        added,
        changed,
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(indexes: &[ListIndex]) -> Vec<ListIndexId> {
        indexes.iter().map(ListIndex::id).collect()
    }

    #[test]
    fn same_list_is_stable() {
        let mut differ = ListDiffer::new();
        let list = Value::list(["a", "b", "c"]);
        let first = differ.diff(None, None, Some(&list));
        assert_eq!(first.added.len(), 3);

        let again = differ.diff(None, Some(&list), Some(&list));
        assert!(again.is_unchanged());
        assert!(Rc::ptr_eq(&again.old_indexes, &again.new_indexes));
        assert_eq!(ids(&again.new_indexes), ids(&first.new_indexes));
    }

    #[test]
    fn duplicate_values_get_distinct_identities() {
        let mut differ = ListDiffer::new();
        let empty = Value::list(Vec::<Value>::new());
        let doubled = Value::list(["a", "a"]);
        let first = differ.diff(None, Some(&empty), Some(&doubled));
        assert_eq!(first.added.len(), 2);
        assert_ne!(first.new_indexes[0].id(), first.new_indexes[1].id());

        let copy = Value::list(["a", "a"]);
        let second = differ.diff(None, Some(&doubled), Some(&copy));
        assert!(second.is_unchanged());
        assert_eq!(ids(&second.new_indexes), ids(&first.new_indexes));
    }

    #[test]
    fn growing_duplicates_reuses_the_first_identity() {
        let mut differ = ListDiffer::new();
        let single = Value::list(["a"]);
        let seeded = differ.diff(None, None, Some(&single));
        let doubled = Value::list(["a", "a"]);
        let grown = differ.diff(None, Some(&single), Some(&doubled));
        assert_eq!(grown.new_indexes[0].id(), seeded.new_indexes[0].id());
        assert_eq!(grown.added.len(), 1);
        assert_eq!(grown.added[0].id(), grown.new_indexes[1].id());
        assert!(grown.changed.is_empty());
        assert!(grown.deleted.is_empty());
    }

    #[test]
    fn reorder_updates_positions_in_place() {
        let mut differ = ListDiffer::new();
        let before = Value::list(["x", "y", "z"]);
        let seeded = differ.diff(None, None, Some(&before));
        let after = Value::list(["z", "x"]);
        let diff = differ.diff(None, Some(&before), Some(&after));

        let z = &seeded.new_indexes[2];
        let x = &seeded.new_indexes[0];
        assert_eq!(z.index(), 0);
        assert_eq!(x.index(), 1);
        assert_eq!(ids(&diff.changed), vec![z.id(), x.id()]);
        assert_eq!(ids(&diff.deleted), vec![seeded.new_indexes[1].id()]);
        assert!(diff.added.is_empty());
    }

    #[test]
    fn emptying_deletes_everything() {
        let mut differ = ListDiffer::new();
        let before = Value::list([1, 2]);
        differ.diff(None, None, Some(&before));
        let diff = differ.diff(None, Some(&before), Some(&Value::Null));
        assert_eq!(diff.deleted.len(), 2);
        assert!(diff.new_indexes.is_empty());
    }

    #[test]
    fn results_are_memoized_per_pair() {
        let mut differ = ListDiffer::new();
        let a = Value::list([1]);
        let b = Value::list([1, 2]);
        let first = differ.diff(None, Some(&a), Some(&b));
        let second = differ.diff(None, Some(&a), Some(&b));
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(differ.stats().memo_hits, 1);
    }

    #[test]
    fn records_match_by_identity() {
        let mut differ = ListDiffer::new();
        let item = Value::record([("n", 1)]);
        let before = Value::list([item.clone()]);
        let seeded = differ.diff(None, None, Some(&before));
        let after = Value::list([Value::record([("n", 1)]), item]);
        let diff = differ.diff(None, Some(&before), Some(&after));
        assert_eq!(diff.new_indexes[1].id(), seeded.new_indexes[0].id());
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.changed.len(), 1);
    }

    #[test]
    fn nested_lists_carry_their_parent() {
        let mut differ = ListDiffer::new();
        let outer = ListIndex::new(None, 0);
        let inner = Value::list(["p", "q"]);
        let diff = differ.diff(Some(&outer), None, Some(&inner));
        assert_eq!(diff.new_indexes[1].indexes().as_slice(), &[0, 1]);
        differ.forget_parent(&outer);
        assert!(differ.indexes_of(Some(&outer), inner.as_list().unwrap()).is_none());
    }

    #[test]
    fn forgetting_several_parents_keeps_the_rest() {
        let mut differ = ListDiffer::new();
        let parents: Vec<ListIndex> = (0..3).map(|i| ListIndex::new(None, i)).collect();
        let inner = Value::list(["p"]);
        for parent in &parents {
            differ.diff(Some(parent), None, Some(&inner));
        }
        let gone: AHashSet<ListIndexId> = parents[..2].iter().map(ListIndex::id).collect();
        differ.forget_parents(&gone);
        let list = inner.as_list().unwrap();
        assert!(differ.indexes_of(Some(&parents[0]), list).is_none());
        assert!(differ.indexes_of(Some(&parents[1]), list).is_none());
        assert!(differ.indexes_of(Some(&parents[2]), list).is_some());
    }

    #[test]
    fn search_kind_selects_sets() {
        assert_eq!(SearchKind::parse("delete"), Some(SearchKind::Delete));
        assert_eq!(SearchKind::parse("bogus"), None);
        assert_eq!(SearchKind::default().as_str(), "new");
    }
}
