#![forbid(unsafe_code)]

//! State values held by containers.
//!
//! # Design
//!
//! [`Value`] is a small dynamic tree. Lists and records carry an identity
//! ([`NodeId`]) with reference semantics: clones share the identity, and the
//! list diff engine compares them by identity rather than by content.
//!
//! # Invariants
//!
//! 1. Writing a field of a [`Record`] keeps the record's identity (in-place
//!    mutation).
//! 2. Replacing a slot of a [`List`] gives the list a fresh identity, so a
//!    re-diff of the "same" list always observes membership changes.
//! 3. Mutating a value nested inside a list element keeps the list identity.
//! 4. `PartialEq` is structural; [`Value::strict_eq`] is identity-based for
//!    lists and records.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a list or record node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ─── List ────────────────────────────────────────────────────────────────────

/// An ordered list with identity.
#[derive(Clone)]
pub struct List {
    id: NodeId,
    items: Rc<Vec<Value>>,
}

impl List {
    /// Create a list with a fresh identity.
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            id: NodeId::next(),
            items: Rc::new(items),
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    /// Whether both handles refer to the same list identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Mutable access to an element for a nested write. Keeps the identity.
    pub fn element_mut(&mut self, index: usize) -> Option<&mut Value> {
        Rc::make_mut(&mut self.items).get_mut(index)
    }

    /// Replace the element at `index`, assigning a fresh identity.
    ///
    /// Returns `false` when `index` is out of bounds.
    pub fn replace(&mut self, index: usize, value: Value) -> bool {
        if index >= self.items.len() {
            return false;
        }
        Rc::make_mut(&mut self.items)[index] = value;
        self.id = NodeId::next();
        true
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A keyed record with identity.
#[derive(Clone)]
pub struct Record {
    id: NodeId,
    fields: Rc<BTreeMap<Rc<str>, Value>>,
}

impl Record {
    /// Create an empty record with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NodeId::next(),
            fields: Rc::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (&**k, v))
    }

    /// Set a field in place. Keeps the identity.
    pub fn set(&mut self, key: &str, value: Value) {
        Rc::make_mut(&mut self.fields).insert(Rc::from(key), value);
    }

    /// Mutable access to a field, inserting `Null` when missing.
    pub fn field_mut(&mut self, key: &str) -> &mut Value {
        Rc::make_mut(&mut self.fields)
            .entry(Rc::from(key))
            .or_insert(Value::Null)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        Rc::make_mut(&mut self.fields).remove(key)
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

// ─── Value ───────────────────────────────────────────────────────────────────

/// A dynamic state value.
#[derive(Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(List),
    Record(Record),
}

impl Value {
    /// Build a list value with a fresh identity.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a record value with a fresh identity.
    pub fn record<'k, I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'k str, T)>,
        T: Into<Value>,
    {
        let mut record = Record::new();
        for (key, value) in fields {
            record.set(key, value.into());
        }
        Self::Record(record)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Short type label for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// Strict equality: primitives by value, lists and records by identity.
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        self.strict_key() == other.strict_key()
    }

    /// Hashable key implementing [`Value::strict_eq`].
    #[must_use]
    pub fn strict_key(&self) -> StrictKey {
        match self {
            Self::Null => StrictKey::Null,
            Self::Bool(b) => StrictKey::Bool(*b),
            Self::Number(n) => {
                // -0 and +0 are equal; every NaN maps to one key.
                let normalized = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                StrictKey::Number(normalized.to_bits())
            }
            Self::Str(s) => StrictKey::Str(Rc::clone(s)),
            Self::List(list) => StrictKey::Node(list.id),
            Self::Record(record) => StrictKey::Node(record.id),
        }
    }

    /// Convert into a JSON document.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::List(list) => {
                serde_json::Value::Array(list.iter().map(Value::to_json).collect())
            }
            Self::Record(record) => serde_json::Value::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Key type for strict (identity) equality of values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StrictKey {
    Null,
    Bool(bool),
    Number(u64),
    Str(Rc<str>),
    Node(NodeId),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(list) => list.fmt(f),
            Self::Record(record) => record.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (key, value) in map {
                    record.set(&key, Value::from(value));
                }
                Self::Record(record)
            }
        }
    }
}
