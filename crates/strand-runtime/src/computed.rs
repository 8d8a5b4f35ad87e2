#![forbid(unsafe_code)]

//! Computed values: derived state evaluated lazily and cached per address.
//!
//! A compute function receives a [`ComputeScope`]. Every read made through
//! the scope is recorded as a dynamic dependency from the read pattern to
//! the computed pattern, so later changes of what was read invalidate the
//! cached result.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use strand_core::{AbsolutePattern, AbsoluteStateAddress, ListIndex, Result, Value};

use crate::engine::Engine;

pub type ComputeFn = Rc<dyn Fn(&ComputeScope<'_>) -> Result<Value>>;

/// A registered computed pattern.
#[derive(Clone)]
pub struct ComputedDef {
    pub pattern: AbsolutePattern,
    pub compute: ComputeFn,
}

impl fmt::Debug for ComputedDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedDef")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Evaluation context of one computed address.
pub struct ComputeScope<'e> {
    engine: &'e Engine,
    target: AbsoluteStateAddress,
}

impl<'e> ComputeScope<'e> {
    pub(crate) fn new(engine: &'e Engine, target: AbsoluteStateAddress) -> Self {
        Self { engine, target }
    }

    /// The address being computed.
    #[must_use]
    pub fn target(&self) -> &AbsoluteStateAddress {
        &self.target
    }

    #[must_use]
    pub fn list_index(&self) -> Option<&ListIndex> {
        self.target.list_index()
    }

    /// Current loop positions, outermost first.
    #[must_use]
    pub fn indexes(&self) -> SmallVec<[usize; 4]> {
        self.target
            .list_index()
            .map(ListIndex::indexes)
            .unwrap_or_default()
    }

    /// Read `path` in the computed value's own container.
    ///
    /// Unresolved wildcards are bound from the current loop position.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.engine
            .tracked_get(&self.target, self.target.container(), path)
    }

    /// Read `path` in another container.
    pub fn get_in(&self, container: &str, path: &str) -> Result<Value> {
        self.engine.tracked_get(&self.target, container, path)
    }

    /// Values at every live position of a wildcard `path`.
    ///
    /// Leading wildcard levels shared with the computed pattern stay bound to
    /// the current loop position.
    pub fn get_all(&self, path: &str) -> Result<Vec<Value>> {
        self.engine
            .tracked_get_all(&self.target, self.target.container(), path)
    }

    pub fn get_all_in(&self, container: &str, path: &str) -> Result<Vec<Value>> {
        self.engine.tracked_get_all(&self.target, container, path)
    }
}

impl fmt::Debug for ComputeScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeScope")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
