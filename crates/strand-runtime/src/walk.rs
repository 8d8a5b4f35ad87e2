#![forbid(unsafe_code)]

//! Dependency walk: from one changed address to every affected address.
//!
//! # Design
//!
//! The walk is an iterative depth-first traversal with explicit enter/exit
//! frames, so the set of addresses on the current path is known at every
//! step. For each visited address the dependents are computed as follows:
//!
//! - **static dependents** of a list pattern that are its own element
//!   pattern (`items` → `items.*`) are expanded through the list diff of the
//!   value the previous walk synced against the current value; the
//!   [`SearchKind`] selects which index set is followed.
//! - every other dependent (static or dynamic) is bound by wildcard
//!   alignment: wildcard-free dependents get no list index, dependents whose
//!   wildcard levels are all shared with the source reuse the source's list
//!   index truncated to their depth, and the remaining levels are expanded
//!   over every live element of the lists involved.
//!
//! Ancestors of the changed address can be delivered too
//! ([`walk_with_ancestors`]); only their dynamic dependents are followed.
//!
//! # Invariants
//!
//! 1. Each address is delivered at most once per walk.
//! 2. Re-entering an address that is still on the current path fails with
//!    `DependencyCycle`; reaching it again through a different branch does
//!    not.
//! 3. Walks deeper than `max_depth` fail with `DependencyCycle`.
//!
//! # Failure Modes
//!
//! - State reads performed during expansion propagate their errors, except
//!   that a list reached through a deleted element reads as empty.
//! - No graph or list table borrow is held across a state read, so reads
//!   may evaluate computed values that register new edges.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use strand_core::address::AddressId;
use strand_core::list_index::{ListIndexId, depth_of, truncate};
use strand_core::{
    AbsolutePattern, AbsoluteStateAddress, AddressSpace, Error, ListDiff, ListDiffer, ListIndex,
    Result, SearchKind, Value,
};

use crate::graph::DependencyGraph;

/// Read access to current state (raw or computed).
pub trait StateAccessor {
    fn read(&self, address: &AbsoluteStateAddress) -> Result<Value>;
}

impl<F> StateAccessor for F
where
    F: Fn(&AbsoluteStateAddress) -> Result<Value>,
{
    fn read(&self, address: &AbsoluteStateAddress) -> Result<Value> {
        self(address)
    }
}

// ─── ListTracker ─────────────────────────────────────────────────────────────

/// List value plus the identities and positions it was synced with.
#[derive(Debug, Clone)]
struct Snapshot {
    value: Value,
    indexes: Rc<[ListIndex]>,
    positions: Vec<usize>,
}

impl Snapshot {
    fn new(value: Value, indexes: Rc<[ListIndex]>) -> Self {
        let positions = indexes.iter().map(ListIndex::index).collect();
        Self {
            value,
            indexes,
            positions,
        }
    }
}

/// Diff engine plus two views of every list address.
///
/// `observed` is the latest value anyone looked at; expanding a dependent
/// over live elements advances it. `baselines` holds the value the last
/// element walk synced against and only [`ListTracker::sync`] advances it.
#[derive(Debug, Default)]
pub struct ListTracker {
    differ: ListDiffer,
    observed: AHashMap<AbsoluteStateAddress, Value>,
    baselines: AHashMap<AbsoluteStateAddress, Snapshot>,
    deleted: Vec<ListIndex>,
}

impl ListTracker {
    #[must_use]
    pub fn with_memo_capacity(capacity: usize) -> Self {
        Self {
            differ: ListDiffer::with_memo_capacity(capacity),
            ..Self::default()
        }
    }

    /// Diff the baseline at `address` against `current` and make `current`
    /// the new baseline.
    pub fn sync(&mut self, address: &AbsoluteStateAddress, current: &Value) -> Rc<ListDiff> {
        let in_step = match (self.baselines.get(address), self.observed.get(address)) {
            (Some(baseline), Some(observed)) => baseline.value.strict_eq(observed),
            (None, None) => true,
            _ => false,
        };
        let diff = if in_step {
            let diff = self.differ.diff(
                address.list_index(),
                self.baselines.get(address).map(|b| &b.value),
                Some(current),
            );
            self.deleted.extend(diff.deleted.iter().cloned());
            self.observed.insert(address.clone(), current.clone());
            diff
        } else {
            let new_indexes = self.observe(address, current);
            Rc::new(diff_against(self.baselines.get(address), new_indexes))
        };
        self.baselines.insert(
            address.clone(),
            Snapshot::new(current.clone(), Rc::clone(&diff.new_indexes)),
        );
        diff
    }

    /// Live element identities of the list at `address`. Leaves the
    /// baseline alone.
    pub fn live_indexes(&mut self, address: &AbsoluteStateAddress, current: &Value) -> Rc<[ListIndex]> {
        self.observe(address, current)
    }

    fn observe(&mut self, address: &AbsoluteStateAddress, current: &Value) -> Rc<[ListIndex]> {
        let parent = address.list_index();
        let indexes = match self.observed.get(address) {
            Some(previous) => {
                let diff = self.differ.diff(parent, Some(previous), Some(current));
                self.deleted.extend(diff.deleted.iter().cloned());
                Rc::clone(&diff.new_indexes)
            }
            None => {
                let indexes = match current.as_list() {
                    Some(list) => self.differ.live_indexes(parent, list),
                    None => Rc::from(Vec::new()),
                };
                // First sight doubles as the baseline.
                self.baselines
                    .entry(address.clone())
                    .or_insert_with(|| Snapshot::new(current.clone(), Rc::clone(&indexes)));
                indexes
            }
        };
        self.observed.insert(address.clone(), current.clone());
        indexes
    }

    /// Identities deleted since the last call.
    pub fn take_deleted(&mut self) -> Vec<ListIndex> {
        let mut seen = AHashSet::new();
        let mut out = std::mem::take(&mut self.deleted);
        out.retain(|li| seen.insert(li.id()));
        out
    }

    #[must_use]
    pub fn differ(&self) -> &ListDiffer {
        &self.differ
    }

    #[must_use]
    pub fn tracked_lists(&self) -> usize {
        self.observed.len()
    }

    pub fn evict_container(&mut self, container: &str) {
        let mut gone = AHashSet::new();
        self.observed.retain(|address, value| {
            let keep = address.container() != container;
            if !keep && let Some(list) = value.as_list() {
                gone.insert(list.id());
            }
            keep
        });
        self.baselines.retain(|address, snapshot| {
            let keep = address.container() != container;
            if !keep && let Some(list) = snapshot.value.as_list() {
                gone.insert(list.id());
            }
            keep
        });
        self.differ.retain_lists(|id| !gone.contains(&id));
    }

    /// Forget lists bound to one of `ids` or anything nested under them.
    pub fn evict_list_indexes(&mut self, ids: &AHashSet<ListIndexId>) {
        if ids.is_empty() {
            return;
        }
        let live = |a: &AbsoluteStateAddress| !a.list_index().is_some_and(|li| li.descends_from_any(ids));
        self.observed.retain(|a, _| live(a));
        self.baselines.retain(|a, _| live(a));
        self.differ.forget_parents(ids);
    }
}

/// Diff of `baseline` against identities already reconciled past it.
fn diff_against(baseline: Option<&Snapshot>, new_indexes: Rc<[ListIndex]>) -> ListDiff {
    let (old_indexes, before): (Rc<[ListIndex]>, AHashMap<ListIndexId, usize>) = match baseline {
        Some(b) => (
            Rc::clone(&b.indexes),
            b.indexes
                .iter()
                .map(ListIndex::id)
                .zip(b.positions.iter().copied())
                .collect(),
        ),
        None => (Rc::from(Vec::new()), AHashMap::new()),
    };
    let mut added = Vec::new();
    let mut changed = Vec::new();
    for (position, li) in new_indexes.iter().enumerate() {
        match before.get(&li.id()) {
            None => added.push(li.clone()),
            Some(&was) if was != position => changed.push(li.clone()),
            Some(_) => {}
        }
    }
    let live: AHashSet<ListIndexId> = new_indexes.iter().map(ListIndex::id).collect();
    let deleted = old_indexes
        .iter()
        .filter(|li| !live.contains(&li.id()))
        .cloned()
        .collect();
    ListDiff {
        old_indexes,
        new_indexes,
        added,
        changed,
        deleted,
    }
}

// ─── Walk ────────────────────────────────────────────────────────────────────

/// Everything a walk needs, borrowed from the owner.
pub struct WalkContext<'a> {
    pub space: &'a AddressSpace,
    pub graph: &'a RefCell<DependencyGraph>,
    pub lists: &'a RefCell<ListTracker>,
    pub accessor: &'a dyn StateAccessor,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Follow {
    All,
    DynamicOnly,
}

enum Frame {
    Enter {
        address: AbsoluteStateAddress,
        depth: usize,
        follow: Follow,
    },
    Exit(AddressId),
}

/// Walk from `start`, delivering every reachable address to `visit`.
///
/// Returns the deduplicated addresses in delivery order.
pub fn walk_dependency(
    cx: &WalkContext<'_>,
    start: &AbsoluteStateAddress,
    search: SearchKind,
    visit: impl FnMut(&AbsoluteStateAddress),
) -> Result<Vec<AbsoluteStateAddress>> {
    run(cx, start, &[], search, visit)
}

/// Like [`walk_dependency`], then also delivers every ancestor of `start`
/// and follows the ancestors' dynamic dependents.
pub fn walk_with_ancestors(
    cx: &WalkContext<'_>,
    start: &AbsoluteStateAddress,
    search: SearchKind,
    visit: impl FnMut(&AbsoluteStateAddress),
) -> Result<Vec<AbsoluteStateAddress>> {
    let ancestors = cx.space.absolute_ancestors(start);
    run(cx, start, &ancestors, search, visit)
}

fn run(
    cx: &WalkContext<'_>,
    start: &AbsoluteStateAddress,
    ancestors: &[AbsoluteStateAddress],
    search: SearchKind,
    mut visit: impl FnMut(&AbsoluteStateAddress),
) -> Result<Vec<AbsoluteStateAddress>> {
    let mut stack: Vec<Frame> = Vec::with_capacity(16);
    // Ancestors sit below `start` so they are handled after the full walk.
    for ancestor in ancestors.iter().rev() {
        stack.push(Frame::Enter {
            address: ancestor.clone(),
            depth: 0,
            follow: Follow::DynamicOnly,
        });
    }
    stack.push(Frame::Enter {
        address: start.clone(),
        depth: 0,
        follow: Follow::All,
    });

    let mut visited: AHashSet<AddressId> = AHashSet::new();
    let mut on_path: AHashSet<AddressId> = AHashSet::new();
    let mut out = Vec::new();

    while let Some(frame) = stack.pop() {
        let (address, depth, follow) = match frame {
            Frame::Exit(id) => {
                on_path.remove(&id);
                continue;
            }
            Frame::Enter {
                address,
                depth,
                follow,
            } => (address, depth, follow),
        };
        if on_path.contains(&address.id()) || depth > cx.max_depth {
            tracing::warn!(
                message = "strand.walk_cycle",
                address = %address.describe(),
                depth
            );
            return Err(Error::DependencyCycle {
                path: address.describe(),
                depth,
            });
        }
        if !visited.insert(address.id()) {
            continue;
        }
        visit(&address);
        out.push(address.clone());

        let dependents = dependents_of(cx, &address, follow, search)?;
        on_path.insert(address.id());
        stack.push(Frame::Exit(address.id()));
        for dependent in dependents.into_iter().rev() {
            stack.push(Frame::Enter {
                address: dependent,
                depth: depth + 1,
                follow: Follow::All,
            });
        }
    }

    tracing::trace!(
        message = "strand.walk",
        start = %start.describe(),
        reached = out.len()
    );
    Ok(out)
}

fn dependents_of(
    cx: &WalkContext<'_>,
    address: &AbsoluteStateAddress,
    follow: Follow,
    search: SearchKind,
) -> Result<Vec<AbsoluteStateAddress>> {
    let pattern = address.absolute_pattern();
    let (statics, dynamics, is_list) = {
        let graph = cx.graph.borrow();
        let statics = if follow == Follow::All {
            graph.static_dependents(pattern).to_vec()
        } else {
            Vec::new()
        };
        (
            statics,
            graph.dynamic_dependents(pattern).to_vec(),
            graph.is_list(pattern),
        )
    };

    let mut out = Vec::new();
    let mut diff: Option<Rc<ListDiff>> = None;
    for dependent in &statics {
        if is_list && is_element_of(dependent, pattern) {
            if diff.is_none() {
                let current = read_list(cx, address)?;
                diff = Some(cx.lists.borrow_mut().sync(address, &current));
            }
            if let Some(diff) = &diff {
                for li in diff.select(search) {
                    out.push(cx.space.absolute_address(dependent, Some(li))?);
                }
            }
        } else {
            bind(cx, address, dependent, &mut out)?;
        }
    }
    for dependent in &dynamics {
        bind(cx, address, dependent, &mut out)?;
    }
    Ok(out)
}

fn is_element_of(candidate: &AbsolutePattern, list: &AbsolutePattern) -> bool {
    candidate.container() == list.container()
        && candidate.pattern().is_element()
        && candidate.pattern().parent() == Some(list.pattern())
}

/// Bind `dependent` to concrete addresses relative to `source`.
fn bind(
    cx: &WalkContext<'_>,
    source: &AbsoluteStateAddress,
    dependent: &AbsolutePattern,
    out: &mut Vec<AbsoluteStateAddress>,
) -> Result<()> {
    let levels = dependent.pattern().wildcard_count();
    if levels == 0 {
        out.push(cx.space.absolute_address(dependent, None)?);
        return Ok(());
    }
    let shared = if dependent.container() == source.container() {
        dependent
            .pattern()
            .shared_wildcard_depth(source.pattern())
            .min(depth_of(source.list_index()))
    } else {
        0
    };
    let base = truncate(source.list_index(), shared);
    if shared == levels {
        out.push(cx.space.absolute_address(dependent, base.as_ref())?);
        return Ok(());
    }
    expand(cx, dependent, shared, base, out)
}

fn expand(
    cx: &WalkContext<'_>,
    dependent: &AbsolutePattern,
    level: usize,
    base: Option<ListIndex>,
    out: &mut Vec<AbsoluteStateAddress>,
) -> Result<()> {
    let pattern = dependent.pattern();
    if level == pattern.wildcard_count() {
        out.push(cx.space.absolute_address(dependent, base.as_ref())?);
        return Ok(());
    }
    let Some(list_pattern) = pattern.list_pattern(level) else {
        return Ok(());
    };
    let list_pattern = cx.space.absolute_pattern(dependent.container(), &list_pattern);
    let list_address = cx.space.absolute_address(&list_pattern, base.as_ref())?;
    let current = read_list(cx, &list_address)?;
    let indexes = cx.lists.borrow_mut().live_indexes(&list_address, &current);
    for li in indexes.iter() {
        expand(cx, dependent, level + 1, Some(li.clone()), out)?;
    }
    Ok(())
}

fn read_list(cx: &WalkContext<'_>, address: &AbsoluteStateAddress) -> Result<Value> {
    match cx.accessor.read(address) {
        Err(Error::ListIndexNotFound { .. }) => Ok(Value::Null),
        other => other,
    }
}
