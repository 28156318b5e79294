//! Runtime errors and retry classification.

use thiserror::Error;

/// Errors raised by the controller runtime itself.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A work item could not be parsed as a `namespace/name` key
    #[error("invalid work key: {0:?}")]
    InvalidKey(String),

    /// Informer caches never reported as synced
    #[error("failed to wait for informer caches to be synced for controller {0:?}")]
    CacheSync(String),
}

/// What the worker pool does with a key after its handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Re-add after the key's exponential backoff delay
    Backoff,
    /// Re-add right away without growing the backoff (e.g. write conflicts)
    Immediate,
    /// Drop the key; it comes back only when a new event enqueues it
    Never,
}

/// Classifies handler errors into a [`Requeue`] decision.
pub trait RequeuePolicy {
    /// Returns how the failed key should be retried.
    fn requeue(&self) -> Requeue;
}
