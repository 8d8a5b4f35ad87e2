#![forbid(unsafe_code)]

//! One-time parse of concrete path strings.
//!
//! A [`ResolvedAddress`] pairs the canonical [`Pattern`] of a path with the
//! list positions the path spells out literally (`items.2.name` resolves
//! wildcard level 0 to `2`; `items.*.name` leaves it unresolved).

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::path::{Pattern, PatternTable, WILDCARD, is_index_segment, split_path};

/// Wildcard classification of a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WildcardKind {
    /// No wildcard slots at all.
    None,
    /// Every slot unresolved: positions come from the ambient loop context.
    Context,
    /// Every slot resolved by a literal index.
    All,
    /// Mixed literal and unresolved slots.
    Partial,
}

impl WildcardKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Context => "context",
            Self::All => "all",
            Self::Partial => "partial",
        }
    }
}

struct ResolvedData {
    path: Rc<str>,
    pattern: Pattern,
    indices: SmallVec<[Option<usize>; 2]>,
    kind: WildcardKind,
}

/// A parsed concrete path.
#[derive(Clone)]
pub struct ResolvedAddress(Rc<ResolvedData>);

impl ResolvedAddress {
    fn parse(path: &str, patterns: &mut PatternTable) -> Result<Self> {
        let segments = split_path(path)?;
        let pattern = patterns.intern(path)?;
        let mut indices: SmallVec<[Option<usize>; 2]> = SmallVec::new();
        for segment in &segments {
            if *segment == WILDCARD {
                indices.push(None);
            } else if is_index_segment(segment) {
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| Error::address(path, "list index out of range"))?;
                indices.push(Some(index));
            }
        }
        let resolved = indices.iter().filter(|i| i.is_some()).count();
        let kind = match (indices.len(), resolved) {
            (0, _) => WildcardKind::None,
            (_, 0) => WildcardKind::Context,
            (n, r) if n == r => WildcardKind::All,
            _ => WildcardKind::Partial,
        };
        Ok(Self(Rc::new(ResolvedData {
            path: Rc::from(path),
            pattern,
            indices,
            kind,
        })))
    }

    /// The path as written.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.0.path
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.0.pattern
    }

    /// One entry per wildcard level: the literal index or `None`.
    #[must_use]
    pub fn indices(&self) -> &[Option<usize>] {
        &self.0.indices
    }

    #[must_use]
    pub fn kind(&self) -> WildcardKind {
        self.0.kind
    }

    /// Complete every wildcard slot into a concrete position list.
    ///
    /// Literal slots win; unresolved slots take `context` positions by level.
    /// `Partial` addresses are rejected here: completing them is only
    /// supported during dependency expansion and `get_all`.
    pub fn complete(&self, context: &[usize]) -> Result<SmallVec<[usize; 4]>> {
        match self.kind() {
            WildcardKind::None => Ok(SmallVec::new()),
            WildcardKind::All => Ok(self.indices().iter().flatten().copied().collect()),
            WildcardKind::Context => {
                if context.len() < self.indices().len() {
                    return Err(Error::wildcard(
                        self.path(),
                        format!(
                            "{} wildcard level(s) but only {} index(es) available",
                            self.indices().len(),
                            context.len()
                        ),
                    ));
                }
                Ok(context[..self.indices().len()].iter().copied().collect())
            }
            WildcardKind::Partial => Err(Error::wildcard(
                self.path(),
                "partial wildcard addresses are not supported for index lookup",
            )),
        }
    }
}

impl std::fmt::Debug for ResolvedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAddress")
            .field("path", &self.path())
            .field("pattern", &self.pattern().path())
            .field("indices", &self.indices())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Memo of parsed paths.
#[derive(Default)]
pub struct ResolvedTable {
    by_path: AHashMap<Rc<str>, ResolvedAddress>,
}

impl ResolvedTable {
    pub fn resolve(&mut self, path: &str, patterns: &mut PatternTable) -> Result<ResolvedAddress> {
        if let Some(resolved) = self.by_path.get(path) {
            return Ok(resolved.clone());
        }
        let resolved = ResolvedAddress::parse(path, patterns)?;
        self.by_path.insert(Rc::clone(&resolved.0.path), resolved.clone());
        Ok(resolved)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
