#![forbid(unsafe_code)]

//! Batched delivery of changed addresses to consumers.
//!
//! # Design
//!
//! Change walks enqueue every affected address. The first enqueue after a
//! flush moves the scheduler from `Idle` to `Scheduled`; the owner uses that
//! transition to request exactly one deferred flush. A flush takes the whole
//! pending batch, groups the addresses by consumer and applies each consumer
//! once with all of its addresses.
//!
//! # Invariants
//!
//! 1. Within one batch, every consumer is applied at most once.
//! 2. An address enqueued several times before a flush is delivered once.
//! 3. Enqueues made while a batch is being dispatched land in the next batch.
//!
//! # Failure Modes
//!
//! - A consumer returning an error is logged, recorded in the
//!   [`FlushReport`] and never retried; the remaining consumers still run.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use strand_core::list_index::ListIndexId;
use strand_core::{AbsoluteStateAddress, ListIndex};

use crate::error::ConsumerError;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that reacts to changed addresses.
///
/// `Cx` is whatever the owner passes at dispatch time (the engine, so
/// consumers can read fresh values).
pub trait Consumer<Cx: ?Sized> {
    fn apply(&self, cx: &Cx, changed: &[AbsoluteStateAddress]) -> Result<(), ConsumerError>;
}

impl<Cx: ?Sized, F> Consumer<Cx> for F
where
    F: Fn(&Cx, &[AbsoluteStateAddress]) -> Result<(), ConsumerError>,
{
    fn apply(&self, cx: &Cx, changed: &[AbsoluteStateAddress]) -> Result<(), ConsumerError> {
        self(cx, changed)
    }
}

/// Shared handle to a consumer; clones keep the same id.
pub struct ConsumerHandle<Cx: ?Sized> {
    id: ConsumerId,
    label: Rc<str>,
    consumer: Rc<dyn Consumer<Cx>>,
}

impl<Cx: ?Sized> ConsumerHandle<Cx> {
    pub fn new(label: &str, consumer: impl Consumer<Cx> + 'static) -> Self {
        Self {
            id: ConsumerId::next(),
            label: Rc::from(label),
            consumer: Rc::new(consumer),
        }
    }

    /// Handle around a closure.
    pub fn from_fn<F>(label: &str, f: F) -> Self
    where
        F: Fn(&Cx, &[AbsoluteStateAddress]) -> Result<(), ConsumerError> + 'static,
    {
        Self::new(label, f)
    }

    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<Cx: ?Sized> Clone for ConsumerHandle<Cx> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: Rc::clone(&self.label),
            consumer: Rc::clone(&self.consumer),
        }
    }
}

impl<Cx: ?Sized> fmt::Debug for ConsumerHandle<Cx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Scheduled,
}

/// A consumer that failed during a flush.
#[derive(Debug, Clone)]
pub struct ConsumerFailure {
    pub consumer: ConsumerId,
    pub label: Rc<str>,
    pub error: ConsumerError,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Distinct addresses in the batch.
    pub addresses: usize,
    /// Consumers applied successfully.
    pub applied: usize,
    pub failures: Vec<ConsumerFailure>,
}

impl FlushReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One pending batch, detached from the scheduler.
pub struct FlushBatch<Cx: ?Sized> {
    addresses: Vec<AbsoluteStateAddress>,
    plan: Vec<(ConsumerHandle<Cx>, Vec<AbsoluteStateAddress>)>,
}

impl<Cx: ?Sized> FlushBatch<Cx> {
    #[must_use]
    pub fn addresses(&self) -> &[AbsoluteStateAddress] {
        &self.addresses
    }

    /// Number of consumers that will be applied.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.plan.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Apply every consumer once with its addresses.
    pub fn dispatch(self, cx: &Cx) -> FlushReport {
        let mut report = FlushReport {
            addresses: self.addresses.len(),
            ..FlushReport::default()
        };
        for (handle, changed) in self.plan {
            match handle.consumer.apply(cx, &changed) {
                Ok(()) => report.applied += 1,
                Err(error) => {
                    tracing::warn!(
                        message = "strand.consumer_failed",
                        consumer = %handle.id,
                        label = %handle.label,
                        addresses = changed.len(),
                        error = %error
                    );
                    report.failures.push(ConsumerFailure {
                        consumer: handle.id,
                        label: Rc::clone(&handle.label),
                        error,
                    });
                }
            }
        }
        report
    }
}

pub struct Scheduler<Cx: ?Sized> {
    pending: Vec<AbsoluteStateAddress>,
    state: SchedulerState,
    consumers: AHashMap<AbsoluteStateAddress, SmallVec<[ConsumerHandle<Cx>; 2]>>,
    batches: u64,
}

impl<Cx: ?Sized> Default for Scheduler<Cx> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            state: SchedulerState::Idle,
            consumers: AHashMap::new(),
            batches: 0,
        }
    }
}

impl<Cx: ?Sized> fmt::Debug for Scheduler<Cx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("consumer_addresses", &self.consumers.len())
            .field("batches", &self.batches)
            .finish()
    }
}

impl<Cx: ?Sized> Scheduler<Cx> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of batches taken so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Queue `address` for the next flush.
    ///
    /// Returns `true` when this enqueue moved the scheduler out of `Idle`.
    pub fn enqueue(&mut self, address: AbsoluteStateAddress) -> bool {
        self.pending.push(address);
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Scheduled;
            return true;
        }
        false
    }

    /// Attach `handle` to `address`. Returns `false` if already attached.
    pub fn register_consumer(&mut self, address: &AbsoluteStateAddress, handle: ConsumerHandle<Cx>) -> bool {
        let slot = self.consumers.entry(address.clone()).or_default();
        if slot.iter().any(|h| h.id == handle.id) {
            return false;
        }
        slot.push(handle);
        true
    }

    pub fn unregister_consumer(&mut self, address: &AbsoluteStateAddress, id: ConsumerId) -> bool {
        let Some(slot) = self.consumers.get_mut(address) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|h| h.id != id);
        let removed = slot.len() != before;
        if slot.is_empty() {
            self.consumers.remove(address);
        }
        removed
    }

    #[must_use]
    pub fn consumer_count(&self, address: &AbsoluteStateAddress) -> usize {
        self.consumers.get(address).map_or(0, SmallVec::len)
    }

    /// Detach the pending batch and return to `Idle`.
    pub fn take_batch(&mut self) -> FlushBatch<Cx> {
        self.state = SchedulerState::Idle;
        self.batches += 1;
        let mut seen = AHashSet::new();
        let mut addresses = std::mem::take(&mut self.pending);
        addresses.retain(|a| seen.insert(a.id()));

        let mut plan: Vec<(ConsumerHandle<Cx>, Vec<AbsoluteStateAddress>)> = Vec::new();
        let mut slots: AHashMap<ConsumerId, usize> = AHashMap::new();
        for address in &addresses {
            let Some(handles) = self.consumers.get(address) else {
                continue;
            };
            for handle in handles {
                let slot = *slots.entry(handle.id).or_insert_with(|| {
                    plan.push((handle.clone(), Vec::new()));
                    plan.len() - 1
                });
                plan[slot].1.push(address.clone());
            }
        }
        FlushBatch { addresses, plan }
    }

    pub fn evict_container(&mut self, container: &str) {
        self.consumers.retain(|a, _| a.container() != container);
        self.pending.retain(|a| a.container() != container);
    }

    /// Drop consumers bound to `list_index` or anything nested under it.
    pub fn evict_list_index(&mut self, list_index: &ListIndex) -> usize {
        self.evict_list_indexes(&[list_index.id()].into_iter().collect())
    }

    /// Drop consumers bound to one of `ids` or anything nested under them.
    pub fn evict_list_indexes(&mut self, ids: &AHashSet<ListIndexId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let before = self.consumers.len();
        self.consumers
            .retain(|a, _| !a.list_index().is_some_and(|li| li.descends_from_any(ids)));
        before - self.consumers.len()
    }
}
