#![forbid(unsafe_code)]

//! Interned state addresses.
//!
//! # Design
//!
//! An [`AddressSpace`] owns every intern table of one engine: patterns,
//! parsed paths, [`StateAddress`]es, [`AbsolutePattern`]s and
//! [`AbsoluteStateAddress`]es. Nothing is process-global, so independent
//! engines can coexist. Handles carry integer ids and compare by id; the
//! tables guarantee that logically identical addresses are the same handle.
//!
//! Tables are behind `RefCell` so lookups take `&self`; no borrow is held
//! across calls into other components.
//!
//! # Invariants
//!
//! 1. `address(p, li)` returns the same handle for the same `(p, li)` pair.
//! 2. A list index chain's depth always equals its pattern's wildcard count.
//! 3. `parent()` strips the last segment, stepping the list index to its
//!    parent when that segment was a wildcard; it is computed once.
//!
//! # Failure Modes
//!
//! - Depth mismatch between pattern and list index: `WildcardResolution`.
//! - Evicted handles stay valid for holders but are no longer returned by
//!   interning; a fresh handle is created on the next lookup.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::error::{Error, Result};
use crate::list_index::{ListIndex, ListIndexId};
use crate::path::{Pattern, PatternId, PatternTable};
use crate::resolved::{ResolvedAddress, ResolvedTable};

/// Stable id of an interned address (state or absolute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressId(u64);

impl AddressId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

fn render(path: &str, list_index: Option<&ListIndex>) -> String {
    match list_index {
        Some(li) => format!("{path}{:?}", li.indexes().as_slice()),
        None => path.to_string(),
    }
}

// ─── StateAddress ────────────────────────────────────────────────────────────

struct StateAddressData {
    id: AddressId,
    pattern: Pattern,
    list_index: Option<ListIndex>,
    parent: OnceCell<Option<StateAddress>>,
}

/// A pattern bound to a concrete loop position.
#[derive(Clone)]
pub struct StateAddress(Rc<StateAddressData>);

impl StateAddress {
    #[must_use]
    pub fn id(&self) -> AddressId {
        self.0.id
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.0.pattern
    }

    #[must_use]
    pub fn list_index(&self) -> Option<&ListIndex> {
        self.0.list_index.as_ref()
    }
}

impl PartialEq for StateAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for StateAddress {}

impl Hash for StateAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for StateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateAddress({})", render(self.pattern().path(), self.list_index()))
    }
}

// ─── AbsolutePattern ─────────────────────────────────────────────────────────

struct AbsolutePatternData {
    id: AddressId,
    container: Rc<str>,
    pattern: Pattern,
}

/// A pattern scoped by a state container name.
#[derive(Clone)]
pub struct AbsolutePattern(Rc<AbsolutePatternData>);

impl AbsolutePattern {
    #[must_use]
    pub fn id(&self) -> AddressId {
        self.0.id
    }

    #[must_use]
    pub fn container(&self) -> &str {
        &self.0.container
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.0.pattern
    }
}

impl PartialEq for AbsolutePattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for AbsolutePattern {}

impl Hash for AbsolutePattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for AbsolutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for AbsolutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container(), self.pattern().path())
    }
}

// ─── AbsoluteStateAddress ────────────────────────────────────────────────────

struct AbsoluteAddressData {
    id: AddressId,
    pattern: AbsolutePattern,
    list_index: Option<ListIndex>,
    parent: OnceCell<Option<AbsoluteStateAddress>>,
}

/// A container-scoped state address: the key of caches, consumers and walks.
#[derive(Clone)]
pub struct AbsoluteStateAddress(Rc<AbsoluteAddressData>);

impl AbsoluteStateAddress {
    #[must_use]
    pub fn id(&self) -> AddressId {
        self.0.id
    }

    #[must_use]
    pub fn absolute_pattern(&self) -> &AbsolutePattern {
        &self.0.pattern
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        self.0.pattern.pattern()
    }

    #[must_use]
    pub fn container(&self) -> &str {
        self.0.pattern.container()
    }

    #[must_use]
    pub fn list_index(&self) -> Option<&ListIndex> {
        self.0.list_index.as_ref()
    }

    /// Human-readable form, `container:path[positions]`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}:{}",
            self.container(),
            render(self.pattern().path(), self.list_index())
        )
    }
}

impl PartialEq for AbsoluteStateAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for AbsoluteStateAddress {}

impl Hash for AbsoluteStateAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for AbsoluteStateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ─── AddressSpace ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    patterns: PatternTable,
    resolved: ResolvedTable,
    states: AHashMap<(PatternId, Option<ListIndexId>), StateAddress>,
    absolute_patterns: AHashMap<(Rc<str>, PatternId), AbsolutePattern>,
    absolutes: AHashMap<(AddressId, Option<ListIndexId>), AbsoluteStateAddress>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> AddressId {
        self.next_id += 1;
        AddressId(self.next_id)
    }
}

/// Owner of every intern table of one engine.
#[derive(Default)]
pub struct AddressSpace {
    tables: RefCell<Tables>,
}

fn check_depth(pattern: &Pattern, list_index: Option<&ListIndex>) -> Result<()> {
    let depth = list_index.map_or(0, ListIndex::depth);
    if depth != pattern.wildcard_count() {
        return Err(Error::wildcard(
            pattern.path(),
            format!(
                "list index depth {depth} does not match {} wildcard level(s)",
                pattern.wildcard_count()
            ),
        ));
    }
    Ok(())
}

fn parent_parts(pattern: &Pattern, list_index: Option<&ListIndex>) -> Option<(Pattern, Option<ListIndex>)> {
    let parent = pattern.parent()?.clone();
    let list_index = if pattern.is_element() {
        list_index.and_then(ListIndex::parent).cloned()
    } else {
        list_index.cloned()
    };
    Some((parent, list_index))
}

impl AddressSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a path string into its canonical pattern.
    pub fn intern_pattern(&self, path: &str) -> Result<Pattern> {
        self.tables.borrow_mut().patterns.intern(path)
    }

    /// Parse a concrete path (memoized).
    pub fn resolve_address(&self, path: &str) -> Result<ResolvedAddress> {
        let tables = &mut *self.tables.borrow_mut();
        tables.resolved.resolve(path, &mut tables.patterns)
    }

    /// Interned `(pattern, list_index)` address.
    pub fn address(&self, pattern: &Pattern, list_index: Option<&ListIndex>) -> Result<StateAddress> {
        check_depth(pattern, list_index)?;
        let key = (pattern.id(), list_index.map(ListIndex::id));
        let tables = &mut *self.tables.borrow_mut();
        if let Some(address) = tables.states.get(&key) {
            return Ok(address.clone());
        }
        let address = StateAddress(Rc::new(StateAddressData {
            id: tables.next_id(),
            pattern: pattern.clone(),
            list_index: list_index.cloned(),
            parent: OnceCell::new(),
        }));
        tables.states.insert(key, address.clone());
        Ok(address)
    }

    /// Parent address, computed on first access and cached on the handle.
    pub fn parent(&self, address: &StateAddress) -> Option<StateAddress> {
        address
            .0
            .parent
            .get_or_init(|| {
                let (pattern, list_index) = parent_parts(address.pattern(), address.list_index())?;
                self.address(&pattern, list_index.as_ref()).ok()
            })
            .clone()
    }

    /// Interned container-scoped pattern.
    pub fn absolute_pattern(&self, container: &str, pattern: &Pattern) -> AbsolutePattern {
        let tables = &mut *self.tables.borrow_mut();
        let key = (Rc::<str>::from(container), pattern.id());
        if let Some(abs) = tables.absolute_patterns.get(&key) {
            return abs.clone();
        }
        let abs = AbsolutePattern(Rc::new(AbsolutePatternData {
            id: tables.next_id(),
            container: Rc::clone(&key.0),
            pattern: pattern.clone(),
        }));
        tables.absolute_patterns.insert(key, abs.clone());
        abs
    }

    /// Interned container-scoped address.
    pub fn absolute_address(
        &self,
        pattern: &AbsolutePattern,
        list_index: Option<&ListIndex>,
    ) -> Result<AbsoluteStateAddress> {
        check_depth(pattern.pattern(), list_index)?;
        let key = (pattern.id(), list_index.map(ListIndex::id));
        let tables = &mut *self.tables.borrow_mut();
        if let Some(address) = tables.absolutes.get(&key) {
            return Ok(address.clone());
        }
        let address = AbsoluteStateAddress(Rc::new(AbsoluteAddressData {
            id: tables.next_id(),
            pattern: pattern.clone(),
            list_index: list_index.cloned(),
            parent: OnceCell::new(),
        }));
        tables.absolutes.insert(key, address.clone());
        Ok(address)
    }

    /// Parent of a container-scoped address, cached on the handle.
    pub fn absolute_parent(&self, address: &AbsoluteStateAddress) -> Option<AbsoluteStateAddress> {
        address
            .0
            .parent
            .get_or_init(|| {
                let (pattern, list_index) = parent_parts(address.pattern(), address.list_index())?;
                let abs = self.absolute_pattern(address.container(), &pattern);
                self.absolute_address(&abs, list_index.as_ref()).ok()
            })
            .clone()
    }

    /// Every ancestor of `address`, nearest first.
    pub fn absolute_ancestors(&self, address: &AbsoluteStateAddress) -> Vec<AbsoluteStateAddress> {
        let mut out = Vec::new();
        let mut current = self.absolute_parent(address);
        while let Some(parent) = current {
            current = self.absolute_parent(&parent);
            out.push(parent);
        }
        out
    }

    /// Forget every container-scoped handle of `container`.
    pub fn evict_container(&self, container: &str) -> usize {
        let tables = &mut *self.tables.borrow_mut();
        let before = tables.absolutes.len() + tables.absolute_patterns.len();
        tables
            .absolute_patterns
            .retain(|(name, _), _| &**name != container);
        tables
            .absolutes
            .retain(|_, address| address.container() != container);
        before - tables.absolutes.len() - tables.absolute_patterns.len()
    }

    /// Forget every address bound to `list_index` or one of its descendants.
    pub fn evict_list_index(&self, list_index: &ListIndex) -> usize {
        self.evict_list_indexes(&[list_index.id()].into_iter().collect())
    }

    /// Forget every address bound to one of `ids` or a descendant, in one
    /// pass over each table.
    pub fn evict_list_indexes(&self, ids: &AHashSet<ListIndexId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let tables = &mut *self.tables.borrow_mut();
        let before = tables.states.len() + tables.absolutes.len();
        let live = |li: Option<&ListIndex>| !li.is_some_and(|li| li.descends_from_any(ids));
        tables.states.retain(|_, a| live(a.list_index()));
        tables.absolutes.retain(|_, a| live(a.list_index()));
        before - tables.states.len() - tables.absolutes.len()
    }

    /// Number of distinct patterns interned so far.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.tables.borrow().patterns.len()
    }

    /// Number of live interned container-scoped addresses.
    #[must_use]
    pub fn absolute_address_count(&self) -> usize {
        self.tables.borrow().absolutes.len()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.borrow();
        f.debug_struct("AddressSpace")
            .field("patterns", &tables.patterns.len())
            .field("states", &tables.states.len())
            .field("absolutes", &tables.absolutes.len())
            .finish()
    }
}
