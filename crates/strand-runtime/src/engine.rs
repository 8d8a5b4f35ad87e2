#![forbid(unsafe_code)]

//! The engine: containers, computed values, change propagation and flushes.
//!
//! # Design
//!
//! [`Engine`] owns one [`AddressSpace`] and every runtime table. All methods
//! take `&self`; state lives behind `RefCell`s that are only borrowed for the
//! duration of a single table operation, so compute functions and consumers
//! may re-enter the engine freely (read, write, mark changed).
//!
//! A write goes through three steps:
//!
//! 1. the container value is updated copy-on-write and its revision bumped;
//! 2. a dependency walk collects every affected address, invalidating each
//!    cached computed value as it is reached;
//! 3. the affected addresses are queued; the first enqueue after a flush
//!    invokes the flush hook (if any) so the host can schedule [`Engine::flush`].
//!
//! # Invariants
//!
//! 1. A computed value is never served from cache after a walk reached its
//!    address, nor when it was stamped before a write whose walk failed.
//! 2. Each consumer is applied at most once per flush.
//! 3. Computed paths are read-only.
//!
//! # Failure Modes
//!
//! - Unknown container names: `ContainerNotFound`.
//! - Recursive evaluation of one computed address: `DependencyCycle`.
//! - Walk errors abort the change before anything is queued.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use strand_core::address::AddressId;
use strand_core::list_diff::DiffStats;
use strand_core::list_index::{depth_of, truncate};
use strand_core::path::PatternId;
use strand_core::{
    AbsolutePattern, AbsoluteStateAddress, AddressSpace, Error, ListIndex, Pattern,
    ResolvedAddress, Result, SearchKind, Value, WildcardKind,
};

use crate::cache::{
    CacheEntry, CacheStats, RevisionStamp, RevisionStamps, ValueCache, merge_stamps,
};
use crate::computed::{ComputeScope, ComputedDef};
use crate::config::EngineConfig;
use crate::container::{StateContainer, read_path};
use crate::graph::DependencyGraph;
use crate::scheduler::{ConsumerHandle, ConsumerId, FlushReport, Scheduler, SchedulerState};
use crate::walk::{ListTracker, WalkContext, walk_with_ancestors};

/// One computed value being evaluated, with the revisions it has read.
struct Evaluation {
    id: AddressId,
    stamps: RevisionStamps,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    walks: u64,
    flushes: u64,
    evaluations: u64,
    consumer_failures: u64,
    evicted_elements: u64,
}

/// Snapshot of engine diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub walks: u64,
    pub flushes: u64,
    /// Compute function invocations.
    pub evaluations: u64,
    pub consumer_failures: u64,
    /// List element identities evicted after flushes.
    pub evicted_elements: u64,
    pub cache: CacheStats,
    pub diff: DiffStats,
    pub static_edges: usize,
    pub dynamic_edges: usize,
    pub interned_addresses: usize,
}

pub struct Engine {
    config: EngineConfig,
    space: AddressSpace,
    containers: RefCell<AHashMap<Rc<str>, StateContainer>>,
    computed: RefCell<AHashMap<Rc<str>, AHashMap<PatternId, ComputedDef>>>,
    graph: RefCell<DependencyGraph>,
    lists: RefCell<ListTracker>,
    cache: RefCell<ValueCache>,
    scheduler: RefCell<Scheduler<Engine>>,
    evaluating: RefCell<Vec<Evaluation>>,
    flush_hook: RefCell<Option<Rc<dyn Fn()>>>,
    counters: Cell<Counters>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("containers", &self.containers.borrow().len())
            .field("space", &self.space)
            .field("scheduler", &*self.scheduler.borrow())
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let lists = ListTracker::with_memo_capacity(config.diff_memo_capacity);
        Self {
            config,
            space: AddressSpace::new(),
            containers: RefCell::new(AHashMap::new()),
            computed: RefCell::new(AHashMap::new()),
            graph: RefCell::new(DependencyGraph::new()),
            lists: RefCell::new(lists),
            cache: RefCell::new(ValueCache::new()),
            scheduler: RefCell::new(Scheduler::new()),
            evaluating: RefCell::new(Vec::new()),
            flush_hook: RefCell::new(None),
            counters: Cell::new(Counters::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    /// Called once each time the scheduler leaves `Idle`.
    pub fn on_flush_requested(&self, hook: impl Fn() + 'static) {
        *self.flush_hook.borrow_mut() = Some(Rc::new(hook));
    }

    fn bump(&self, f: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.get();
        f(&mut counters);
        self.counters.set(counters);
    }

    // ─── Containers ──────────────────────────────────────────────────────────

    pub fn register_container(&self, name: &str, initial: Value) -> Result<()> {
        let container = StateContainer::new(name, initial)?;
        let mut containers = self.containers.borrow_mut();
        if containers.contains_key(name) {
            return Err(Error::invalid_write(name, "container already registered"));
        }
        containers.insert(Rc::from(name), container);
        tracing::debug!(message = "strand.container_registered", container = name);
        Ok(())
    }

    /// Remove a container and everything interned or cached for it.
    pub fn unregister_container(&self, name: &str) -> Result<()> {
        if self.containers.borrow_mut().remove(name).is_none() {
            return Err(Error::container_not_found(name));
        }
        self.computed.borrow_mut().remove(name);
        self.graph.borrow_mut().evict_container(name);
        let cached = self.cache.borrow_mut().evict_container(name);
        self.scheduler.borrow_mut().evict_container(name);
        self.lists.borrow_mut().evict_container(name);
        let interned = self.space.evict_container(name);
        tracing::debug!(
            message = "strand.container_unregistered",
            container = name,
            cached,
            interned
        );
        Ok(())
    }

    #[must_use]
    pub fn has_container(&self, name: &str) -> bool {
        self.containers.borrow().contains_key(name)
    }

    /// Current revision of a container (bumped on every write).
    pub fn revision(&self, name: &str) -> Result<u64> {
        self.containers
            .borrow()
            .get(name)
            .map(StateContainer::revision)
            .ok_or_else(|| Error::container_not_found(name))
    }

    fn ensure_container(&self, name: &str) -> Result<()> {
        if self.has_container(name) {
            Ok(())
        } else {
            Err(Error::container_not_found(name))
        }
    }

    // ─── Patterns and dependencies ───────────────────────────────────────────

    /// Container-scoped pattern for `path`, linked into the static tree.
    pub fn absolute_pattern(&self, container: &str, path: &str) -> Result<AbsolutePattern> {
        self.ensure_container(container)?;
        let pattern = self.space.intern_pattern(path)?;
        let abs = self.space.absolute_pattern(container, &pattern);
        self.graph.borrow_mut().register_pattern(&self.space, &abs);
        Ok(abs)
    }

    /// Explicit structural binding (loop or conditional) from `parent` to
    /// `child` within one container.
    pub fn add_static_dependency(&self, container: &str, parent: &str, child: &str) -> Result<bool> {
        let parent = self.absolute_pattern(container, parent)?;
        let child = self.absolute_pattern(container, child)?;
        Ok(self.graph.borrow_mut().add_static_dependency(&parent, &child))
    }

    /// Declare that `target` is derived from `source`. Each side is a
    /// `(container, path)` pair.
    pub fn add_dynamic_dependency(&self, source: (&str, &str), target: (&str, &str)) -> Result<bool> {
        let source = self.absolute_pattern(source.0, source.1)?;
        let target = self.absolute_pattern(target.0, target.1)?;
        Ok(self.graph.borrow_mut().add_dynamic_dependency(&source, &target))
    }

    fn track(&self, source: &AbsolutePattern, target: &AbsoluteStateAddress) {
        let mut graph = self.graph.borrow_mut();
        graph.register_pattern(&self.space, source);
        graph.add_dynamic_dependency(source, target.absolute_pattern());
    }

    // ─── Computed values ─────────────────────────────────────────────────────

    /// Define `path` in `container` as a computed value.
    ///
    /// The path may contain wildcards; `f` then runs once per live element.
    pub fn define_computed<F>(&self, container: &str, path: &str, f: F) -> Result<AbsolutePattern>
    where
        F: Fn(&ComputeScope<'_>) -> Result<Value> + 'static,
    {
        let abs = self.absolute_pattern(container, path)?;
        let def = ComputedDef {
            pattern: abs.clone(),
            compute: Rc::new(f),
        };
        self.computed
            .borrow_mut()
            .entry(Rc::from(container))
            .or_default()
            .insert(abs.pattern().id(), def);
        tracing::debug!(message = "strand.computed_defined", pattern = %abs);
        Ok(abs)
    }

    /// Nearest computed pattern at or above `pattern`.
    fn computed_prefix(&self, container: &str, pattern: &Pattern) -> Option<ComputedDef> {
        let computed = self.computed.borrow();
        let defs = computed.get(container)?;
        let mut current = Some(pattern);
        while let Some(p) = current {
            if let Some(def) = defs.get(&p.id()) {
                return Some(def.clone());
            }
            current = p.parent();
        }
        None
    }

    fn evaluate(&self, def: &ComputedDef, target: &AbsoluteStateAddress) -> Result<Value> {
        let cached = {
            let containers = self.containers.borrow();
            self.cache
                .borrow_mut()
                .get_if(target, |entry| is_fresh(&containers, entry))
        };
        if let Some(entry) = cached {
            self.note_stamps(&entry.stamps);
            return Ok(entry.value);
        }
        {
            let mut evaluating = self.evaluating.borrow_mut();
            if evaluating.iter().any(|e| e.id == target.id()) {
                return Err(Error::DependencyCycle {
                    path: target.describe(),
                    depth: evaluating.len(),
                });
            }
            evaluating.push(Evaluation {
                id: target.id(),
                stamps: RevisionStamps::new(),
            });
        }
        let scope = ComputeScope::new(self, target.clone());
        let result = (def.compute)(&scope);
        let stamps = self
            .evaluating
            .borrow_mut()
            .pop()
            .map(|e| e.stamps)
            .unwrap_or_default();
        let value = result?;

        // The enclosing evaluation depends on everything this one read.
        self.note_stamps(&stamps);
        self.cache.borrow_mut().set(target, value.clone(), stamps);
        self.bump(|c| c.evaluations += 1);
        tracing::trace!(message = "strand.computed", address = %target.describe());
        Ok(value)
    }

    /// Record the current revision of `container` against the innermost
    /// evaluation.
    fn note_read(&self, container: &str) {
        let revision = match self.containers.borrow().get(container) {
            Some(c) => c.revision(),
            None => return,
        };
        self.note_stamps(&[RevisionStamp::new(container, revision)]);
    }

    fn note_stamps(&self, stamps: &[RevisionStamp]) {
        if let Some(current) = self.evaluating.borrow_mut().last_mut() {
            merge_stamps(&mut current.stamps, stamps);
        }
    }

    /// Cache entry of a computed address, without touching the counters.
    #[must_use]
    pub fn cached(&self, address: &AbsoluteStateAddress) -> Option<CacheEntry> {
        self.cache.borrow().peek(address).cloned()
    }

    // ─── Addresses ───────────────────────────────────────────────────────────

    /// Live element identities of the list owning wildcard `level` of
    /// `pattern`, below `base`.
    fn live_indexes_at(
        &self,
        container: &str,
        pattern: &Pattern,
        level: usize,
        base: Option<&ListIndex>,
    ) -> Result<Rc<[ListIndex]>> {
        let list_pattern = pattern
            .list_pattern(level)
            .ok_or_else(|| Error::wildcard(pattern.path(), format!("no wildcard level {level}")))?;
        let abs = self.space.absolute_pattern(container, &list_pattern);
        let list_address = self.space.absolute_address(&abs, base)?;
        let value = self.read(&list_address)?;
        Ok(self.lists.borrow_mut().live_indexes(&list_address, &value))
    }

    fn list_index_at(&self, container: &str, pattern: &Pattern, positions: &[usize]) -> Result<Option<ListIndex>> {
        let mut current: Option<ListIndex> = None;
        for (level, &position) in positions.iter().enumerate() {
            let indexes = self.live_indexes_at(container, pattern, level, current.as_ref())?;
            let li = indexes.get(position).cloned().ok_or_else(|| Error::ListIndexNotFound {
                path: pattern.path().to_string(),
                index: position,
                len: indexes.len(),
            })?;
            current = Some(li);
        }
        Ok(current)
    }

    fn address_for(&self, container: &str, resolved: &ResolvedAddress, indices: &[usize]) -> Result<AbsoluteStateAddress> {
        self.ensure_container(container)?;
        let positions = resolved.complete(indices)?;
        let pattern = resolved.pattern();
        let li = self.list_index_at(container, pattern, &positions)?;
        let abs = self.space.absolute_pattern(container, pattern);
        self.space.absolute_address(&abs, li.as_ref())
    }

    /// Address of `path` in `container`; unresolved wildcards take `indices`
    /// in order.
    pub fn address(&self, container: &str, path: &str, indices: &[usize]) -> Result<AbsoluteStateAddress> {
        let resolved = self.space.resolve_address(path)?;
        self.address_for(container, &resolved, indices)
    }

    fn expand_all(
        &self,
        container: &str,
        resolved: &ResolvedAddress,
        indices: &[usize],
        base: Option<ListIndex>,
        start_level: usize,
    ) -> Result<Vec<AbsoluteStateAddress>> {
        let mut fill = indices.iter().copied();
        let fixed: SmallVec<[Option<usize>; 4]> = resolved
            .indices()
            .iter()
            .enumerate()
            .map(|(level, literal)| {
                if level < start_level {
                    None
                } else {
                    literal.or_else(|| fill.next())
                }
            })
            .collect();
        let abs = self.space.absolute_pattern(container, resolved.pattern());
        let mut out = Vec::new();
        self.expand_level(&abs, &fixed, start_level, base, &mut out)?;
        Ok(out)
    }

    fn expand_level(
        &self,
        abs: &AbsolutePattern,
        fixed: &[Option<usize>],
        level: usize,
        base: Option<ListIndex>,
        out: &mut Vec<AbsoluteStateAddress>,
    ) -> Result<()> {
        if level == fixed.len() {
            out.push(self.space.absolute_address(abs, base.as_ref())?);
            return Ok(());
        }
        let indexes = self.live_indexes_at(abs.container(), abs.pattern(), level, base.as_ref())?;
        match fixed[level] {
            Some(position) => {
                let li = indexes.get(position).cloned().ok_or_else(|| Error::ListIndexNotFound {
                    path: abs.pattern().path().to_string(),
                    index: position,
                    len: indexes.len(),
                })?;
                self.expand_level(abs, fixed, level + 1, Some(li), out)
            }
            None => {
                for li in indexes.iter() {
                    self.expand_level(abs, fixed, level + 1, Some(li.clone()), out)?;
                }
                Ok(())
            }
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    /// Current value at `address`, evaluating computed values as needed.
    pub fn read(&self, address: &AbsoluteStateAddress) -> Result<Value> {
        let pattern = address.pattern();
        let positions = address
            .list_index()
            .map(ListIndex::indexes)
            .unwrap_or_default();

        if let Some(def) = self.computed_prefix(address.container(), pattern) {
            let levels = def.pattern.pattern().wildcard_count();
            let li = truncate(address.list_index(), levels);
            let target = self.space.absolute_address(&def.pattern, li.as_ref())?;
            let value = self.evaluate(&def, &target)?;
            let depth = def.pattern.pattern().segment_count();
            if depth == pattern.segment_count() {
                return Ok(value);
            }
            return read_path(
                &value,
                &pattern.segments()[depth..],
                &positions[levels..],
                pattern.path(),
            );
        }

        let containers = self.containers.borrow();
        let container = containers
            .get(address.container())
            .ok_or_else(|| Error::container_not_found(address.container()))?;
        container.read(pattern.segments(), &positions, pattern.path())
    }

    /// Value of `pattern` at loop position `list_index`.
    pub fn read_value(&self, container: &str, pattern: &Pattern, list_index: Option<&ListIndex>) -> Result<Value> {
        self.ensure_container(container)?;
        let abs = self.space.absolute_pattern(container, pattern);
        let address = self.space.absolute_address(&abs, list_index)?;
        self.read(&address)
    }

    /// Read (`value == None`) or write the value at `path`.
    ///
    /// A write returns the value written.
    pub fn resolve(&self, container: &str, path: &str, indices: &[usize], value: Option<Value>) -> Result<Value> {
        let address = self.address(container, path, indices)?;
        match value {
            None => self.read(&address),
            Some(value) => {
                self.write(&address, value.clone())?;
                Ok(value)
            }
        }
    }

    pub fn get(&self, container: &str, path: &str) -> Result<Value> {
        self.resolve(container, path, &[], None)
    }

    pub fn set(&self, container: &str, path: &str, value: impl Into<Value>) -> Result<()> {
        self.resolve(container, path, &[], Some(value.into())).map(drop)
    }

    /// Read-modify-write of `path`. Returns the new value.
    pub fn update(&self, container: &str, path: &str, f: impl FnOnce(&Value) -> Value) -> Result<Value> {
        let address = self.address(container, path, &[])?;
        let next = f(&self.read(&address)?);
        self.write(&address, next.clone())?;
        Ok(next)
    }

    /// Values at every live position of `path`, in index order.
    ///
    /// Literal indices in the path are honored; `indices` fill unresolved
    /// levels from the outermost; remaining levels are expanded.
    pub fn get_all(&self, container: &str, path: &str, indices: &[usize]) -> Result<Vec<Value>> {
        self.ensure_container(container)?;
        let resolved = self.space.resolve_address(path)?;
        let addresses = self.expand_all(container, &resolved, indices, None, 0)?;
        addresses.iter().map(|a| self.read(a)).collect()
    }

    pub(crate) fn tracked_get(&self, target: &AbsoluteStateAddress, container: &str, path: &str) -> Result<Value> {
        self.ensure_container(container)?;
        let resolved = self.space.resolve_address(path)?;
        let pattern = resolved.pattern();
        let address = if resolved.kind() == WildcardKind::Context {
            let levels = pattern.wildcard_count();
            let shared = self.context_depth(target, container, pattern);
            if shared < levels {
                return Err(Error::wildcard(
                    path,
                    format!("{levels} wildcard level(s) but only {shared} bound by the loop context"),
                ));
            }
            let li = truncate(target.list_index(), levels);
            let abs = self.space.absolute_pattern(container, pattern);
            self.space.absolute_address(&abs, li.as_ref())?
        } else {
            self.address_for(container, &resolved, &[])?
        };
        self.track(address.absolute_pattern(), target);
        self.note_read(container);
        self.read(&address)
    }

    pub(crate) fn tracked_get_all(&self, target: &AbsoluteStateAddress, container: &str, path: &str) -> Result<Vec<Value>> {
        self.ensure_container(container)?;
        let resolved = self.space.resolve_address(path)?;
        let shared = self.context_depth(target, container, resolved.pattern());
        let (base, start) = if resolved.indices()[..shared].iter().all(Option::is_none) {
            (truncate(target.list_index(), shared), shared)
        } else {
            (None, 0)
        };
        let pattern = resolved.pattern();
        let addresses = self.expand_all(container, &resolved, &[], base, start)?;
        let abs = self.space.absolute_pattern(container, pattern);
        self.track(&abs, target);
        // Membership of every expanded list feeds the result too, so a list
        // that shrinks (even to empty) reaches `target`.
        for level in start..pattern.wildcard_count() {
            if let Some(list) = pattern.list_pattern(level) {
                let list = self.space.absolute_pattern(container, &list);
                self.track(&list, target);
            }
        }
        self.note_read(container);
        addresses.iter().map(|a| self.read(a)).collect()
    }

    /// Wildcard levels of `pattern` bound by the loop position of `target`.
    fn context_depth(&self, target: &AbsoluteStateAddress, container: &str, pattern: &Pattern) -> usize {
        if container != target.container() {
            return 0;
        }
        pattern
            .shared_wildcard_depth(target.pattern())
            .min(depth_of(target.list_index()))
    }

    // ─── Writes ──────────────────────────────────────────────────────────────

    /// Write `value` at `address` and propagate the change.
    pub fn write(&self, address: &AbsoluteStateAddress, value: Value) -> Result<()> {
        self.write_with_search(address, value, self.config.default_search)
    }

    /// Like [`Engine::write`], expanding changed lists with `search`.
    pub fn write_with_search(&self, address: &AbsoluteStateAddress, value: Value, search: SearchKind) -> Result<()> {
        let pattern = address.pattern();
        if let Some(def) = self.computed_prefix(address.container(), pattern) {
            return Err(Error::invalid_write(
                pattern.path(),
                format!("`{}` is a computed value", def.pattern.pattern().path()),
            ));
        }
        let positions = address
            .list_index()
            .map(ListIndex::indexes)
            .unwrap_or_default();
        {
            let mut containers = self.containers.borrow_mut();
            let container = containers
                .get_mut(address.container())
                .ok_or_else(|| Error::container_not_found(address.container()))?;
            container.write(pattern.segments(), &positions, value, pattern.path())?;
        }
        if let Err(err) = self.mark_address_changed(address, search) {
            // Dependents the walk never reached must not be served.
            if let Some(container) = self.containers.borrow_mut().get_mut(address.container()) {
                container.mark_unsettled();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Write `value` at `pattern`/`list_index`.
    pub fn write_value(&self, container: &str, pattern: &Pattern, list_index: Option<&ListIndex>, value: Value) -> Result<()> {
        self.ensure_container(container)?;
        let abs = self.space.absolute_pattern(container, pattern);
        let address = self.space.absolute_address(&abs, list_index)?;
        self.write(&address, value)
    }

    // ─── Change propagation ──────────────────────────────────────────────────

    /// Propagate a change of `path` without writing. Returns the number of
    /// affected addresses.
    pub fn mark_changed(&self, container: &str, path: &str, indices: &[usize]) -> Result<usize> {
        let address = self.address(container, path, indices)?;
        Ok(self
            .mark_address_changed(&address, self.config.default_search)?
            .len())
    }

    /// Walk from `address`, invalidate every reached cache entry and queue
    /// the reached addresses for the next flush.
    pub fn mark_address_changed(&self, address: &AbsoluteStateAddress, search: SearchKind) -> Result<Vec<AbsoluteStateAddress>> {
        let _span = tracing::debug_span!(
            "strand.walk",
            address = %address.describe(),
            search = search.as_str()
        )
        .entered();

        let accessor = |a: &AbsoluteStateAddress| self.read(a);
        let cx = WalkContext {
            space: &self.space,
            graph: &self.graph,
            lists: &self.lists,
            accessor: &accessor,
            max_depth: self.config.max_walk_depth,
        };
        let reached = walk_with_ancestors(&cx, address, search, |a| {
            self.cache.borrow_mut().invalidate(a);
        })?;
        self.bump(|c| c.walks += 1);

        let mut requested = false;
        {
            let mut scheduler = self.scheduler.borrow_mut();
            for a in &reached {
                requested |= scheduler.enqueue(a.clone());
            }
        }
        tracing::debug!(message = "strand.changed", reached = reached.len());
        if requested {
            self.request_flush();
        }
        Ok(reached)
    }

    fn request_flush(&self) {
        let hook = self.flush_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    // ─── Consumers and flushing ──────────────────────────────────────────────

    /// Attach a consumer to `address`. Returns `false` if already attached.
    pub fn register_consumer(&self, address: &AbsoluteStateAddress, handle: ConsumerHandle<Engine>) -> bool {
        self.graph
            .borrow_mut()
            .register_pattern(&self.space, address.absolute_pattern());
        self.scheduler.borrow_mut().register_consumer(address, handle)
    }

    pub fn unregister_consumer(&self, address: &AbsoluteStateAddress, id: ConsumerId) -> bool {
        self.scheduler.borrow_mut().unregister_consumer(address, id)
    }

    #[must_use]
    pub fn is_flush_scheduled(&self) -> bool {
        self.scheduler.borrow().state() == SchedulerState::Scheduled
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduler.borrow().pending_len()
    }

    /// Deliver the pending batch: each consumer runs once with all of its
    /// changed addresses.
    pub fn flush(&self) -> FlushReport {
        let batch = self.scheduler.borrow_mut().take_batch();
        let _span = tracing::debug_span!(
            "strand.flush",
            addresses = batch.addresses().len(),
            consumers = batch.consumer_count()
        )
        .entered();
        let report = batch.dispatch(self);
        let failures = report.failures.len() as u64;
        self.bump(|c| {
            c.flushes += 1;
            c.consumer_failures += failures;
        });
        if self.config.evict_deleted_elements {
            self.evict_deleted();
        }
        report
    }

    fn evict_deleted(&self) {
        let deleted = self.lists.borrow_mut().take_deleted();
        if deleted.is_empty() {
            return;
        }
        let ids: AHashSet<_> = deleted.iter().map(ListIndex::id).collect();
        let interned = self.space.evict_list_indexes(&ids);
        self.cache.borrow_mut().evict_list_indexes(&ids);
        self.scheduler.borrow_mut().evict_list_indexes(&ids);
        self.lists.borrow_mut().evict_list_indexes(&ids);
        let count = deleted.len() as u64;
        self.bump(|c| c.evicted_elements += count);
        tracing::debug!(message = "strand.evicted", elements = count, interned);
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let counters = self.counters.get();
        let (static_edges, dynamic_edges) = self.graph.borrow().edge_counts();
        EngineStats {
            walks: counters.walks,
            flushes: counters.flushes,
            evaluations: counters.evaluations,
            consumer_failures: counters.consumer_failures,
            evicted_elements: counters.evicted_elements,
            cache: self.cache.borrow().stats(),
            diff: self.lists.borrow().differ().stats(),
            static_edges,
            dynamic_edges,
            interned_addresses: self.space.absolute_address_count(),
        }
    }
}

/// Whether every container `entry` read still accepts its stamp.
fn is_fresh(containers: &AHashMap<Rc<str>, StateContainer>, entry: &CacheEntry) -> bool {
    entry.stamps.iter().all(|stamp| {
        containers
            .get(&*stamp.container)
            .is_some_and(|c| c.accepts(stamp.revision))
    })
}
