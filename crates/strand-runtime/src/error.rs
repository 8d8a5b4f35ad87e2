#![forbid(unsafe_code)]

//! Errors raised by consumers during a flush.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// An engine operation performed by the consumer failed.
    #[error(transparent)]
    Engine(#[from] strand_core::Error),

    /// The consumer rejected the update.
    #[error("{0}")]
    Failed(String),
}

impl ConsumerError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_transparent() {
        let err: ConsumerError = strand_core::Error::container_not_found("app").into();
        assert_eq!(err.to_string(), "state container not found: app");
        assert_eq!(ConsumerError::failed("nope").to_string(), "nope");
    }
}
