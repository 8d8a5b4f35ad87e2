#![forbid(unsafe_code)]

//! Error taxonomy shared by every strand crate.
//!
//! Address parsing and dependency-walk errors are programmer/config errors:
//! they are returned to whoever requested the resolution or enqueued the
//! change. None of them is fatal to the process.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed path (empty path or empty segment).
    #[error("invalid path `{path}`: {reason}")]
    Address { path: String, reason: &'static str },

    /// Operation against a container name that is not registered.
    #[error("state container not found: {name}")]
    ContainerNotFound { name: String },

    /// The dependency walk re-entered an address on its own path or
    /// exceeded its depth bound.
    #[error("dependency cycle detected at `{path}` (depth {depth})")]
    DependencyCycle { path: String, depth: usize },

    /// An index implied by a path does not exist in the current list.
    #[error("list index {index} not found at `{path}` (length {len})")]
    ListIndexNotFound {
        path: String,
        index: usize,
        len: usize,
    },

    /// The address classification is not usable by the requested operation.
    #[error("cannot resolve wildcards of `{path}`: {reason}")]
    WildcardResolution { path: String, reason: String },

    /// A write targeted a computed path or passed through a primitive value.
    #[error("invalid write to `{path}`: {reason}")]
    InvalidWrite { path: String, reason: String },
}

impl Error {
    #[must_use]
    pub fn address(path: impl Into<String>, reason: &'static str) -> Self {
        Self::Address {
            path: path.into(),
            reason,
        }
    }

    #[must_use]
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound { name: name.into() }
    }

    #[must_use]
    pub fn wildcard(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WildcardResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_write(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The path the error refers to, if it carries one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Address { path, .. }
            | Self::DependencyCycle { path, .. }
            | Self::ListIndexNotFound { path, .. }
            | Self::WildcardResolution { path, .. }
            | Self::InvalidWrite { path, .. } => Some(path),
            Self::ContainerNotFound { .. } => None,
        }
    }
}
