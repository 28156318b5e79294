//! Controller Runtime
//!
//! Generic building blocks for level-triggered Kubernetes controllers:
//!
//! - `key`: stable `namespace/name` work keys
//! - `backoff` / `rate_limiter`: per-key exponential failure backoff
//! - `workqueue`: a deduplicating, rate-limited work queue
//! - `controller`: a fixed-size worker pool that drains the queue into a
//!   [`SyncHandler`], isolating failures per work item
//!
//! # Example
//!
//! ```no_run
//! use controller_runtime::{GenericController, Requeue, RequeuePolicy, SyncHandler, WorkKey, WorkQueue};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("sync failed")]
//! struct SyncFailed;
//!
//! impl RequeuePolicy for SyncFailed {
//!     fn requeue(&self) -> Requeue {
//!         Requeue::Backoff
//!     }
//! }
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl SyncHandler for Printer {
//!     type Error = SyncFailed;
//!
//!     async fn sync(&self, key: &WorkKey) -> Result<(), SyncFailed> {
//!         println!("syncing {key}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), controller_runtime::RuntimeError> {
//! let queue = WorkQueue::with_default_rate_limiter("printer");
//! queue.add("default/example");
//!
//! let controller = GenericController::new("printer", 2, queue, Arc::new(Printer));
//! let shutdown = CancellationToken::new();
//! controller.run(Vec::new(), shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod controller;
pub mod error;
pub mod key;
pub mod rate_limiter;
pub mod workqueue;

pub use backoff::ExponentialBackoff;
pub use controller::{CacheSynced, GenericController, SyncHandler};
pub use error::{Requeue, RequeuePolicy, RuntimeError};
pub use key::{WorkKey, key_for};
pub use rate_limiter::{ExponentialFailureRateLimiter, RateLimiter};
pub use workqueue::WorkQueue;
