#![forbid(unsafe_code)]

//! Runtime: dependency graph, change walks, value cache, update scheduler
//! and the [`Engine`] tying them to named state containers.

pub mod cache;
pub mod computed;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod graph;
pub mod scheduler;
pub mod walk;

pub use cache::{CacheEntry, CacheStats, RevisionStamp, ValueCache};
pub use computed::ComputeScope;
pub use config::EngineConfig;
pub use container::StateContainer;
pub use engine::{Engine, EngineStats};
pub use error::ConsumerError;
pub use graph::DependencyGraph;
pub use scheduler::{
    Consumer, ConsumerFailure, ConsumerHandle, ConsumerId, FlushBatch, FlushReport, Scheduler,
    SchedulerState,
};
pub use walk::{ListTracker, StateAccessor, WalkContext, walk_dependency, walk_with_ancestors};
