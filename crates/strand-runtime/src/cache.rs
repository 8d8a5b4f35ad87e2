#![forbid(unsafe_code)]

//! Cache of computed values keyed by container-scoped address.
//!
//! Only computed values are cached; raw container state is always read
//! through. An entry is dropped when a change walk reaches its address, and
//! is rejected at read time when one of its revision stamps has gone stale.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use strand_core::list_index::ListIndexId;
use strand_core::{AbsoluteStateAddress, ListIndex, Value};

/// Revision of one container at the time a computed value read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionStamp {
    pub container: Rc<str>,
    pub revision: u64,
}

impl RevisionStamp {
    #[must_use]
    pub fn new(container: &str, revision: u64) -> Self {
        Self {
            container: Rc::from(container),
            revision,
        }
    }
}

/// Stamps of every container a computed value read, oldest revision kept.
pub type RevisionStamps = SmallVec<[RevisionStamp; 2]>;

/// Merge `incoming` into `stamps`, keeping the older revision per container.
pub fn merge_stamps(stamps: &mut RevisionStamps, incoming: &[RevisionStamp]) {
    for stamp in incoming {
        match stamps.iter_mut().find(|s| s.container == stamp.container) {
            Some(existing) => existing.revision = existing.revision.min(stamp.revision),
            None => stamps.push(stamp.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stamps: RevisionStamps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    /// Entries rejected at read time because a stamp was stale.
    pub stale: u64,
}

#[derive(Debug, Default)]
pub struct ValueCache {
    entries: AHashMap<AbsoluteStateAddress, CacheEntry>,
    stats: CacheStats,
}

impl ValueCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `address`, counting the hit or miss.
    pub fn get(&mut self, address: &AbsoluteStateAddress) -> Option<Value> {
        self.get_if(address, |_| true).map(|entry| entry.value)
    }

    /// Cached entry for `address` when `fresh` accepts it. A rejected entry
    /// is dropped and counted as both stale and a miss.
    pub fn get_if(
        &mut self,
        address: &AbsoluteStateAddress,
        fresh: impl FnOnce(&CacheEntry) -> bool,
    ) -> Option<CacheEntry> {
        let checked = self
            .entries
            .get(address)
            .map(|entry| fresh(entry).then(|| entry.clone()));
        match checked {
            Some(Some(entry)) => {
                self.stats.hits += 1;
                Some(entry)
            }
            Some(None) => {
                self.entries.remove(address);
                self.stats.stale += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inspect an entry without touching the counters.
    #[must_use]
    pub fn peek(&self, address: &AbsoluteStateAddress) -> Option<&CacheEntry> {
        self.entries.get(address)
    }

    pub fn set(&mut self, address: &AbsoluteStateAddress, value: Value, stamps: RevisionStamps) {
        self.entries
            .insert(address.clone(), CacheEntry { value, stamps });
    }

    /// Drop the entry for `address`. Returns whether one existed.
    pub fn invalidate(&mut self, address: &AbsoluteStateAddress) -> bool {
        let removed = self.entries.remove(address).is_some();
        if removed {
            self.stats.invalidations += 1;
        }
        removed
    }

    pub fn evict_container(&mut self, container: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|a, _| a.container() != container);
        before - self.entries.len()
    }

    /// Drop entries bound to `list_index` or anything nested under it.
    pub fn evict_list_index(&mut self, list_index: &ListIndex) -> usize {
        self.evict_list_indexes(&[list_index.id()].into_iter().collect())
    }

    /// Drop entries bound to one of `ids` or anything nested under them.
    pub fn evict_list_indexes(&mut self, ids: &AHashSet<ListIndexId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries
            .retain(|a, _| !a.list_index().is_some_and(|li| li.descends_from_any(ids)));
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
