#![forbid(unsafe_code)]

//! Canonical path patterns.
//!
//! A [`Pattern`] is the canonical shape of a dotted property path: every array
//! position (numeric segment) and every unresolved marker is normalized to the
//! [`WILDCARD`] segment. `items.3.name`, `items.*.name` and `items.0.name` all
//! share the pattern `items.*.name`.
//!
//! Patterns are interned by a [`PatternTable`]: identical strings always yield
//! the same pattern object, so patterns compare and hash by id.
//!
//! # Invariants
//!
//! 1. A pattern's parent is the pattern of its path minus the last segment.
//! 2. `prefixes()[i]` is the canonical path of the first `i + 1` segments.
//! 3. `wildcard_positions()` lists segment indices equal to [`WILDCARD`], in
//!    order.
//! 4. Interning the same string twice returns the same id.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// The wildcard segment standing for "any list position".
pub const WILDCARD: &str = "*";

/// Path segment separator.
pub const SEPARATOR: char = '.';

/// Stable id of an interned pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(u32);

impl PatternId {
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

struct PatternData {
    id: PatternId,
    path: Rc<str>,
    segments: SmallVec<[Rc<str>; 4]>,
    prefixes: SmallVec<[Rc<str>; 4]>,
    wildcard_positions: SmallVec<[usize; 2]>,
    parent: Option<Pattern>,
}

/// Interned canonical path shape.
#[derive(Clone)]
pub struct Pattern(Rc<PatternData>);

impl Pattern {
    #[must_use]
    pub fn id(&self) -> PatternId {
        self.0.id
    }

    /// Canonical path string (`items.*.name`).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.0.path
    }

    #[must_use]
    pub fn segments(&self) -> &[Rc<str>] {
        &self.0.segments
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.0.segments.len()
    }

    #[must_use]
    pub fn last_segment(&self) -> &str {
        self.0.segments.last().map_or("", |s| s)
    }

    /// Cumulative canonical prefixes, shortest first.
    #[must_use]
    pub fn prefixes(&self) -> &[Rc<str>] {
        &self.0.prefixes
    }

    #[must_use]
    pub fn wildcard_positions(&self) -> &[usize] {
        &self.0.wildcard_positions
    }

    #[must_use]
    pub fn wildcard_count(&self) -> usize {
        self.0.wildcard_positions.len()
    }

    /// Whether the last segment is the wildcard (the pattern names a list element).
    #[must_use]
    pub fn is_element(&self) -> bool {
        self.last_segment() == WILDCARD
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Pattern> {
        self.0.parent.as_ref()
    }

    /// Ancestor (or self) with exactly `segment_count` segments.
    #[must_use]
    pub fn ancestor(&self, segment_count: usize) -> Option<Pattern> {
        if segment_count == 0 || segment_count > self.segment_count() {
            return None;
        }
        let mut current = self.clone();
        while current.segment_count() > segment_count {
            current = current.parent()?.clone();
        }
        Some(current)
    }

    /// Pattern ending at the `level`-th wildcard (`a.*` for level 0 of `a.*.b.*`).
    #[must_use]
    pub fn wildcard_pattern(&self, level: usize) -> Option<Pattern> {
        let position = *self.0.wildcard_positions.get(level)?;
        self.ancestor(position + 1)
    }

    /// List pattern owning the `level`-th wildcard (`a` for level 0 of `a.*.b`).
    #[must_use]
    pub fn list_pattern(&self, level: usize) -> Option<Pattern> {
        self.wildcard_pattern(level)?.parent().cloned()
    }

    /// Number of leading wildcard levels shared with `other`.
    ///
    /// Two levels are shared when the wildcard sits at the same segment index
    /// and the canonical prefixes up to it are identical.
    #[must_use]
    pub fn shared_wildcard_depth(&self, other: &Pattern) -> usize {
        let mut depth = 0;
        for (&a, &b) in self
            .wildcard_positions()
            .iter()
            .zip(other.wildcard_positions())
        {
            if a != b || self.0.prefixes[a] != other.0.prefixes[b] {
                break;
            }
            depth += 1;
        }
        depth
    }

    /// Whether `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Pattern) -> bool {
        let n = self.segment_count();
        n < other.segment_count() && other.0.prefixes[n - 1] == self.0.path
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Pattern {}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({})", self.path())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Whether a raw segment denotes a list position.
#[must_use]
pub fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Split a path into raw segments, rejecting empty paths and empty segments.
pub fn split_path(path: &str) -> Result<SmallVec<[&str; 4]>> {
    if path.is_empty() {
        return Err(Error::address(path, "empty path"));
    }
    let segments: SmallVec<[&str; 4]> = path.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::address(path, "empty segment"));
    }
    Ok(segments)
}

// ─── Interning ───────────────────────────────────────────────────────────────

/// Intern table for patterns, keyed by both raw and canonical path strings.
#[derive(Default)]
pub struct PatternTable {
    by_path: AHashMap<Rc<str>, Pattern>,
    next_id: u32,
}

impl PatternTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct patterns interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.next_id as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    /// Look up an already-interned path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Pattern> {
        self.by_path.get(path).cloned()
    }

    /// Intern `path`, normalizing numeric segments to the wildcard.
    pub fn intern(&mut self, path: &str) -> Result<Pattern> {
        if let Some(pattern) = self.by_path.get(path) {
            return Ok(pattern.clone());
        }
        let raw = split_path(path)?;
        let canonical: SmallVec<[&str; 4]> = raw
            .iter()
            .map(|s| if is_index_segment(s) { WILDCARD } else { *s })
            .collect();
        let pattern = self.intern_canonical(&canonical);
        if !self.by_path.contains_key(path) {
            self.by_path.insert(Rc::from(path), pattern.clone());
        }
        Ok(pattern)
    }

    fn intern_canonical(&mut self, segments: &[&str]) -> Pattern {
        let joined = segments.join(".");
        if let Some(pattern) = self.by_path.get(joined.as_str()) {
            return pattern.clone();
        }
        let parent = if segments.len() > 1 {
            Some(self.intern_canonical(&segments[..segments.len() - 1]))
        } else {
            None
        };

        let path: Rc<str> = Rc::from(joined);
        let (mut prefixes, mut wildcard_positions) = match &parent {
            Some(p) => (p.0.prefixes.clone(), p.0.wildcard_positions.clone()),
            None => (SmallVec::new(), SmallVec::new()),
        };
        prefixes.push(Rc::clone(&path));
        let last = segments.len() - 1;
        if segments[last] == WILDCARD {
            wildcard_positions.push(last);
        }

        let id = PatternId(self.next_id);
        self.next_id += 1;
        let pattern = Pattern(Rc::new(PatternData {
            id,
            path: Rc::clone(&path),
            segments: segments.iter().map(|s| Rc::from(*s)).collect(),
            prefixes,
            wildcard_positions,
            parent,
        }));
        self.by_path.insert(path, pattern.clone());
        pattern
    }
}
