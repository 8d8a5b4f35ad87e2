#![forbid(unsafe_code)]

//! Named state containers and path navigation over [`Value`] trees.
//!
//! Wildcard segments consume list positions in order, outermost first.
//! Missing record fields read as `Null`; a position past the end of a list
//! is an error. Writes are copy-on-write: unchanged subtrees stay shared
//! with earlier snapshots.

use std::rc::Rc;

use strand_core::{Error, Record, Result, Value, WILDCARD};

/// A named root record plus a revision counter bumped on every write.
#[derive(Debug, Clone)]
pub struct StateContainer {
    name: Rc<str>,
    root: Value,
    revision: u64,
    /// Values stamped with an older revision than this are stale.
    stale_below: u64,
}

impl StateContainer {
    /// Create a container. `Null` becomes an empty record; any other
    /// non-record root is rejected.
    pub fn new(name: &str, root: Value) -> Result<Self> {
        let root = match root {
            Value::Null => Value::Record(Record::new()),
            Value::Record(_) => root,
            other => {
                return Err(Error::invalid_write(
                    name,
                    format!("container root must be a record, got {}", other.kind()),
                ));
            }
        };
        Ok(Self {
            name: Rc::from(name),
            root,
            revision: 0,
            stale_below: 0,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn stale_below(&self) -> u64 {
        self.stale_below
    }

    /// Whether a value computed against `revision` may still be served.
    #[must_use]
    pub fn accepts(&self, revision: u64) -> bool {
        revision >= self.stale_below
    }

    /// Reject every value stamped before the current revision. Used when a
    /// write could not be propagated to its dependents.
    pub fn mark_unsettled(&mut self) {
        self.stale_below = self.revision;
    }

    pub fn read(&self, segments: &[Rc<str>], positions: &[usize], path: &str) -> Result<Value> {
        read_path(&self.root, segments, positions, path)
    }

    pub fn write(&mut self, segments: &[Rc<str>], positions: &[usize], value: Value, path: &str) -> Result<()> {
        write_path(&mut self.root, segments, positions, value, path)?;
        self.revision += 1;
        Ok(())
    }
}

/// Read below `start` following `segments`.
pub fn read_path(start: &Value, segments: &[Rc<str>], positions: &[usize], path: &str) -> Result<Value> {
    let mut current = start;
    let mut level = 0;
    for segment in segments {
        let next = if &**segment == WILDCARD {
            let position = positions.get(level).copied().ok_or_else(|| {
                Error::wildcard(path, format!("no list position for wildcard level {level}"))
            })?;
            level += 1;
            match current {
                Value::List(list) => Some(list.get(position).ok_or_else(|| {
                    Error::ListIndexNotFound {
                        path: path.to_string(),
                        index: position,
                        len: list.len(),
                    }
                })?),
                _ => None,
            }
        } else {
            current.as_record().and_then(|r| r.get(segment))
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

/// Write `value` at `segments` below `target`, creating missing records.
pub fn write_path(
    target: &mut Value,
    segments: &[Rc<str>],
    positions: &[usize],
    value: Value,
    path: &str,
) -> Result<()> {
    let Some((segment, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };
    if &**segment == WILDCARD {
        let (&position, inner) = positions.split_first().ok_or_else(|| {
            Error::wildcard(path, "not enough list positions for write")
        })?;
        let Value::List(list) = target else {
            return Err(Error::invalid_write(
                path,
                format!("cannot index into {}", target.kind()),
            ));
        };
        let len = list.len();
        let missing = || Error::ListIndexNotFound {
            path: path.to_string(),
            index: position,
            len,
        };
        if rest.is_empty() {
            // Membership changes; the list gets a fresh identity.
            return if list.replace(position, value) {
                Ok(())
            } else {
                Err(missing())
            };
        }
        let slot = list.element_mut(position).ok_or_else(missing)?;
        return write_path(slot, rest, inner, value, path);
    }

    if target.is_null() {
        *target = Value::Record(Record::new());
    }
    let Value::Record(record) = target else {
        return Err(Error::invalid_write(
            path,
            format!("cannot set field `{segment}` on {}", target.kind()),
        ));
    };
    if rest.is_empty() {
        record.set(segment, value);
        return Ok(());
    }
    write_path(record.field_mut(segment), rest, positions, value, path)
}
