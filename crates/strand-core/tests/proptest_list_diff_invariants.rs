//! Property-based invariant tests for list diffing.
//!
//! 1. New indexes are positioned 0..n, old indexes cover the old list
//! 2. Every old identity is either reused or deleted, never both
//! 3. Reuse count equals the multiset intersection of old and new values
//! 4. A reused identity maps equal values
//! 5. `changed` is exactly the reused identities whose position moved
//! 6. Diffing a list against itself changes nothing
//! 7. Repeated diffs of the same snapshots hit the memo

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use proptest::prelude::*;
use strand_core::list_index::ListIndexId;
use strand_core::{ListDiffer, SearchKind, Value};

fn arb_items() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(0i32..6, 0..=24)
}

fn ids(indexes: &[strand_core::ListIndex]) -> HashSet<ListIndexId> {
    indexes.iter().map(|li| li.id()).collect()
}

fn counts(items: &[i32]) -> HashMap<i32, usize> {
    let mut out = HashMap::new();
    for &v in items {
        *out.entry(v).or_insert(0) += 1;
    }
    out
}

proptest! {
    #[test]
    fn positions_and_coverage(old in arb_items(), new in arb_items()) {
        let mut differ = ListDiffer::new();
        let (a, b) = (Value::list(old.clone()), Value::list(new.clone()));
        let diff = differ.diff(None, Some(&a), Some(&b));

        prop_assert_eq!(diff.old_indexes.len(), old.len());
        prop_assert_eq!(diff.new_indexes.len(), new.len());
        for (i, li) in diff.new_indexes.iter().enumerate() {
            prop_assert_eq!(li.index(), i);
            prop_assert_eq!(li.depth(), 1);
        }
    }
}

proptest! {
    #[test]
    fn identities_partition(old in arb_items(), new in arb_items()) {
        let mut differ = ListDiffer::new();
        let (a, b) = (Value::list(old.clone()), Value::list(new.clone()));
        let diff = differ.diff(None, Some(&a), Some(&b));

        let old_ids = ids(&diff.old_indexes);
        let new_ids = ids(&diff.new_indexes);
        let deleted = ids(&diff.deleted);
        let added = ids(&diff.added);
        let reused: HashSet<_> = old_ids.intersection(&new_ids).copied().collect();

        prop_assert!(deleted.is_disjoint(&new_ids));
        prop_assert_eq!(reused.len() + deleted.len(), old_ids.len());
        prop_assert!(added.is_disjoint(&old_ids));
        prop_assert_eq!(reused.len() + added.len(), new_ids.len());

        let old_counts = counts(&old);
        let expected: usize = counts(&new)
            .iter()
            .map(|(v, n)| (*n).min(old_counts.get(v).copied().unwrap_or(0)))
            .sum();
        prop_assert_eq!(reused.len(), expected);
    }
}

proptest! {
    #[test]
    fn reuse_maps_equal_values_and_reports_moves(old in arb_items(), new in arb_items()) {
        let mut differ = ListDiffer::new();
        let (a, b) = (Value::list(old.clone()), Value::list(new.clone()));
        // Positions are mutable; capture them before the diff moves anything.
        let before: HashMap<ListIndexId, usize> = differ
            .live_indexes(None, a.as_list().unwrap())
            .iter()
            .map(|li| (li.id(), li.index()))
            .collect();
        let diff = differ.diff(None, Some(&a), Some(&b));

        let mut moved = HashSet::new();
        for (now, li) in diff.new_indexes.iter().enumerate() {
            if let Some(&was) = before.get(&li.id()) {
                prop_assert_eq!(old[was], new[now]);
                if was != now {
                    moved.insert(li.id());
                }
            }
        }
        prop_assert_eq!(ids(&diff.changed), moved);
        prop_assert_eq!(diff.select(SearchKind::Change).len(), diff.changed.len());
    }
}

proptest! {
    #[test]
    fn self_diff_is_unchanged(items in arb_items()) {
        let mut differ = ListDiffer::new();
        let empty = items.is_empty();
        let a = Value::list(items);
        let first = differ.diff(None, None, Some(&a));
        let diff = differ.diff(None, Some(&a), Some(&a));
        prop_assert!(diff.is_unchanged());
        prop_assert_eq!(ids(&diff.new_indexes), ids(&first.new_indexes));
        if !empty {
            prop_assert!(Rc::ptr_eq(&diff.old_indexes, &diff.new_indexes));
        }
    }
}

proptest! {
    #[test]
    fn repeated_diffs_hit_the_memo(old in arb_items(), new in arb_items()) {
        let mut differ = ListDiffer::new();
        let (a, b) = (Value::list(old), Value::list(new));
        let first = differ.diff(None, Some(&a), Some(&b));
        let second = differ.diff(None, Some(&a), Some(&b));
        prop_assert!(Rc::ptr_eq(&first, &second));
        prop_assert_eq!(differ.stats().memo_hits, 1);
    }
}
