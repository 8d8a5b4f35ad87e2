#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! Defaults are usable as-is. Environment variables override defaults, and a
//! JSON document can supply a full or partial configuration (missing fields
//! fall back to defaults).
//!
//! | Variable                    | Field                    |
//! |-----------------------------|--------------------------|
//! | `STRAND_MAX_WALK_DEPTH`     | `max_walk_depth`         |
//! | `STRAND_DIFF_MEMO_CAPACITY` | `diff_memo_capacity`     |
//! | `STRAND_EVICT_DELETED`      | `evict_deleted_elements` |
//! | `STRAND_DEFAULT_SEARCH`     | `default_search`         |

use std::env;

use serde::{Deserialize, Serialize};
use strand_core::SearchKind;
use strand_core::list_diff::DEFAULT_MEMO_CAPACITY;

/// Default bound on dependency walk depth.
pub const DEFAULT_MAX_WALK_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Walks deeper than this fail with a dependency cycle error.
    pub max_walk_depth: usize,
    /// Memoized list diffs kept before the memo is reset.
    pub diff_memo_capacity: usize,
    /// Drop caches, addresses and consumers of deleted list elements after
    /// each flush.
    pub evict_deleted_elements: bool,
    /// Index set used when a change walk expands a list.
    pub default_search: SearchKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_walk_depth: DEFAULT_MAX_WALK_DEPTH,
            diff_memo_capacity: DEFAULT_MEMO_CAPACITY,
            evict_deleted_elements: true,
            default_search: SearchKind::New,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STRAND_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored with a warning and the current value
    /// is kept.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup("STRAND_MAX_WALK_DEPTH") {
            match val.trim().parse() {
                Ok(n) => self.max_walk_depth = n,
                Err(_) => tracing::warn!(key = "STRAND_MAX_WALK_DEPTH", value = %val, "ignoring invalid override"),
            }
        }
        if let Some(val) = lookup("STRAND_DIFF_MEMO_CAPACITY") {
            match val.trim().parse() {
                Ok(n) => self.diff_memo_capacity = n,
                Err(_) => tracing::warn!(key = "STRAND_DIFF_MEMO_CAPACITY", value = %val, "ignoring invalid override"),
            }
        }
        if let Some(val) = lookup("STRAND_EVICT_DELETED") {
            match parse_flag(&val) {
                Some(flag) => self.evict_deleted_elements = flag,
                None => tracing::warn!(key = "STRAND_EVICT_DELETED", value = %val, "ignoring invalid override"),
            }
        }
        if let Some(val) = lookup("STRAND_DEFAULT_SEARCH") {
            match SearchKind::parse(val.trim()) {
                Some(kind) => self.default_search = kind,
                None => tracing::warn!(key = "STRAND_DEFAULT_SEARCH", value = %val, "ignoring invalid override"),
            }
        }
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_max_walk_depth(mut self, depth: usize) -> Self {
        self.max_walk_depth = depth;
        self
    }

    #[must_use]
    pub fn with_diff_memo_capacity(mut self, capacity: usize) -> Self {
        self.diff_memo_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_evict_deleted_elements(mut self, evict: bool) -> Self {
        self.evict_deleted_elements = evict;
        self
    }

    #[must_use]
    pub fn with_default_search(mut self, kind: SearchKind) -> Self {
        self.default_search = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_walk_depth, 512);
        assert_eq!(config.diff_memo_capacity, DEFAULT_MEMO_CAPACITY);
        assert!(config.evict_deleted_elements);
        assert_eq!(config.default_search, SearchKind::New);
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let config = EngineConfig::default().with_overrides(lookup(&[
            ("STRAND_MAX_WALK_DEPTH", "64"),
            ("STRAND_DIFF_MEMO_CAPACITY", "lots"),
            ("STRAND_EVICT_DELETED", "false"),
            ("STRAND_DEFAULT_SEARCH", "delete"),
        ]));
        assert_eq!(config.max_walk_depth, 64);
        assert_eq!(config.diff_memo_capacity, DEFAULT_MEMO_CAPACITY);
        assert!(!config.evict_deleted_elements);
        assert_eq!(config.default_search, SearchKind::Delete);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "max_walk_depth": 8, "default_search": "add" }"#)
                .unwrap();
        assert_eq!(config.max_walk_depth, 8);
        assert_eq!(config.default_search, SearchKind::Add);
        assert!(config.evict_deleted_elements);
        assert!(EngineConfig::from_json_str("{ \"max_walk_depth\": -1 }").is_err());
    }

    #[test]
    fn builders() {
        let config = EngineConfig::new()
            .with_max_walk_depth(3)
            .with_diff_memo_capacity(10)
            .with_evict_deleted_elements(false)
            .with_default_search(SearchKind::Change);
        assert_eq!(config.max_walk_depth, 3);
        assert_eq!(config.diff_memo_capacity, 10);
        assert!(!config.evict_deleted_elements);
        assert_eq!(config.default_search, SearchKind::Change);
    }
}
