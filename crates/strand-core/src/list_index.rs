#![forbid(unsafe_code)]

//! Stable per-element identity inside (possibly nested) lists.
//!
//! A [`ListIndex`] is created by the diff engine when a list element has no
//! reusable predecessor, and is reused for as long as the element survives
//! subsequent diffs. Only its `index` field ever changes.
//!
//! # Invariants
//!
//! 1. `id()` is unique for the lifetime of the process.
//! 2. `depth()` is `parent.depth() + 1` (a root index has depth 1).
//! 3. `indexes()` walks the chain outer→inner and has length `depth()`.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use smallvec::SmallVec;

static NEXT_LIST_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a [`ListIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListIndexId(u64);

impl ListIndexId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

struct ListIndexData {
    id: ListIndexId,
    index: Cell<usize>,
    parent: Option<ListIndex>,
    depth: usize,
}

/// Identity of one element position in a loop.
///
/// Cloning shares the identity (and the mutable position).
#[derive(Clone)]
pub struct ListIndex(Rc<ListIndexData>);

impl ListIndex {
    /// Create a fresh identity at `index`, nested under `parent`.
    #[must_use]
    pub fn new(parent: Option<&ListIndex>, index: usize) -> Self {
        let depth = parent.map_or(1, |p| p.depth() + 1);
        Self(Rc::new(ListIndexData {
            id: ListIndexId(NEXT_LIST_INDEX_ID.fetch_add(1, Ordering::Relaxed)),
            index: Cell::new(index),
            parent: parent.cloned(),
            depth,
        }))
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ListIndexId {
        self.0.id
    }

    /// Current position within the owning list.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.0.index.get()
    }

    /// Move this element to a new position.
    pub fn set_index(&self, index: usize) {
        self.0.index.set(index);
    }

    #[must_use]
    pub fn parent(&self) -> Option<&ListIndex> {
        self.0.parent.as_ref()
    }

    /// Number of nesting levels (1 for an outermost loop).
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// Current positions from the outermost loop inwards.
    #[must_use]
    pub fn indexes(&self) -> SmallVec<[usize; 4]> {
        let mut out: SmallVec<[usize; 4]> = SmallVec::with_capacity(self.depth());
        let mut current = Some(self);
        while let Some(li) = current {
            out.push(li.index());
            current = li.parent();
        }
        out.reverse();
        out
    }

    /// The chain member at nesting `level` (0 = outermost).
    #[must_use]
    pub fn at(&self, level: usize) -> Option<&ListIndex> {
        if level >= self.depth() {
            return None;
        }
        let mut current = self;
        while current.depth() > level + 1 {
            current = current.parent()?;
        }
        Some(current)
    }

    /// Whether `ancestor` is this index or one of its parents.
    #[must_use]
    pub fn descends_from(&self, ancestor: &ListIndex) -> bool {
        self.at(ancestor.depth().saturating_sub(1))
            .is_some_and(|li| li.id() == ancestor.id())
    }

    /// Whether this index or one of its parents is in `ancestors`.
    #[must_use]
    pub fn descends_from_any(&self, ancestors: &AHashSet<ListIndexId>) -> bool {
        let mut current = Some(self);
        while let Some(li) = current {
            if ancestors.contains(&li.id()) {
                return true;
            }
            current = li.parent();
        }
        false
    }
}

/// Keep the outer `levels` of an optional chain (`None` when `levels == 0`).
#[must_use]
pub fn truncate(list_index: Option<&ListIndex>, levels: usize) -> Option<ListIndex> {
    if levels == 0 {
        return None;
    }
    list_index.and_then(|li| li.at(levels - 1)).cloned()
}

/// Depth of an optional chain.
#[must_use]
pub fn depth_of(list_index: Option<&ListIndex>) -> usize {
    list_index.map_or(0, ListIndex::depth)
}

impl PartialEq for ListIndex {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ListIndex {}

impl Hash for ListIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ListIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListIndex#{}{:?}", self.0.id.0, self.indexes().as_slice())
    }
}
