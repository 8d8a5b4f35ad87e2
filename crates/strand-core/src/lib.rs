#![forbid(unsafe_code)]

//! Core: state values, path patterns, list identity, addresses and list diffing.

pub mod address;
pub mod error;
pub mod list_diff;
pub mod list_index;
pub mod path;
pub mod resolved;
pub mod value;

pub use address::{AbsolutePattern, AbsoluteStateAddress, AddressSpace, StateAddress};
pub use error::{Error, Result};
pub use list_diff::{ListDiff, ListDiffer, SearchKind};
pub use list_index::ListIndex;
pub use path::{Pattern, WILDCARD};
pub use resolved::{ResolvedAddress, WildcardKind};
pub use value::{List, Record, Value};
