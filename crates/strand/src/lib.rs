#![forbid(unsafe_code)]

//! strand public facade crate.
//!
//! Re-exports the path and list identity model and, with the default
//! `runtime` feature, the engine.

pub use strand_core::{
    AbsolutePattern, AbsoluteStateAddress, AddressSpace, Error, List, ListIndex, Pattern, Record,
    Result, SearchKind, Value, WildcardKind,
};

#[cfg(feature = "runtime")]
pub use strand_runtime::{ComputeScope, ConsumerError, ConsumerHandle, Engine, EngineConfig, FlushReport};

pub mod prelude {
    pub use strand_core as core;
    #[cfg(feature = "runtime")]
    pub use strand_runtime as runtime;

    pub use strand_core::{AbsoluteStateAddress, Error, List, Record, Result, SearchKind, Value};
    #[cfg(feature = "runtime")]
    pub use strand_runtime::{ComputeScope, ConsumerError, ConsumerHandle, Engine, EngineConfig};
}
