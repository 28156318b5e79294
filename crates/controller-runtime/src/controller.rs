//! Generic controller.
//!
//! Turns a [`WorkQueue`] into steady-state concurrent processing:
//! waits for the informer caches to sync, starts `threadiness` workers that
//! drain the queue into a [`SyncHandler`], and shuts everything down when the
//! cancellation token fires.

use crate::error::{Requeue, RequeuePolicy, RuntimeError};
use crate::key::WorkKey;
use crate::workqueue::WorkQueue;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

/// A future resolving to `true` once a cache has completed its initial list.
pub type CacheSynced = BoxFuture<'static, bool>;

/// Processes a single work key.
///
/// Implementations must re-read the object the key names instead of relying
/// on whatever event enqueued it.
#[async_trait::async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    /// Error type, classified into a retry decision by the worker pool.
    type Error: std::error::Error + RequeuePolicy + Send + Sync + 'static;

    /// Converges the object named by `key`.
    async fn sync(&self, key: &WorkKey) -> Result<(), Self::Error>;
}

/// Worker-pool controller shared by all resource types.
pub struct GenericController<H> {
    name: String,
    threadiness: usize,
    queue: WorkQueue,
    handler: Arc<H>,
}

impl<H> std::fmt::Debug for GenericController<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericController")
            .field("name", &self.name)
            .field("threadiness", &self.threadiness)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<H: SyncHandler> GenericController<H> {
    /// Creates a controller that runs `threadiness` workers over `queue`.
    pub fn new(name: impl Into<String>, threadiness: usize, queue: WorkQueue, handler: Arc<H>) -> Self {
        Self {
            name: name.into(),
            threadiness: threadiness.max(1),
            queue,
            handler,
        }
    }

    /// The queue workers pull from (event handlers enqueue into it).
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Runs the controller until `shutdown` is cancelled.
    ///
    /// Fails fast, without starting any worker, if a cache never reports as
    /// synced. In-flight items are allowed to finish; the queue is shut down
    /// on every exit path.
    pub async fn run(self, cache_synced: Vec<CacheSynced>, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        let span = info_span!("controller", name = %self.name);

        async move {
            debug!("starting controller");

            debug!("waiting for informer caches to be synced");
            let synced = tokio::select! {
                () = shutdown.cancelled() => false,
                results = futures::future::join_all(cache_synced) => results.into_iter().all(|synced| synced),
            };
            if !synced {
                self.queue.shut_down();
                return Err(RuntimeError::CacheSync(self.name.clone()));
            }

            debug!(threadiness = self.threadiness, "starting workers");
            let mut workers = JoinSet::new();
            for worker in 0..self.threadiness {
                let queue = self.queue.clone();
                let handler = Arc::clone(&self.handler);
                let shutdown = shutdown.clone();
                workers.spawn(
                    run_worker(queue, handler, shutdown).instrument(info_span!("worker", id = worker)),
                );
            }
            debug!("started workers");

            shutdown.cancelled().await;
            // Unblocks workers parked in `get`; busy workers exit after their current item.
            self.queue.shut_down();

            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task failed");
                }
            }
            debug!("stopped workers");

            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Processes work items until the queue shuts down or `shutdown` fires.
async fn run_worker<H: SyncHandler>(queue: WorkQueue, handler: Arc<H>, shutdown: CancellationToken) {
    while !shutdown.is_cancelled() {
        if !process_next_work_item(&queue, handler.as_ref()).await {
            break;
        }
    }
}

/// Reads a single item off the queue and hands it to the handler.
///
/// Returns `false` when the queue is shutting down.
pub(crate) async fn process_next_work_item<H: SyncHandler>(queue: &WorkQueue, handler: &H) -> bool {
    let Some(item) = queue.get().await else {
        return false;
    };

    let key = match WorkKey::parse(&item) {
        Ok(key) => key,
        Err(e) => {
            // Retrying an unparseable item would loop forever.
            queue.forget(&item);
            queue.done(&item);
            error!(error = %e, "dropping invalid work item");
            return true;
        }
    };

    match AssertUnwindSafe(handler.sync(&key)).catch_unwind().await {
        Ok(Ok(())) => {
            queue.forget(&item);
            debug!(key = %item, "successfully synced");
        }
        Ok(Err(e)) => match e.requeue() {
            Requeue::Backoff => {
                let retry_in = queue.add_rate_limited(&item);
                warn!(key = %item, error = %e, ?retry_in, "error syncing, requeued with backoff");
            }
            Requeue::Immediate => {
                queue.forget(&item);
                queue.add(item.clone());
                debug!(key = %item, error = %e, "requeued immediately");
            }
            Requeue::Never => {
                queue.forget(&item);
                error!(key = %item, error = %e, "error syncing, not retrying");
            }
        },
        Err(panic) => {
            let retry_in = queue.add_rate_limited(&item);
            error!(key = %item, panic = panic_message(panic.as_ref()), ?retry_in, "panic while syncing, requeued with backoff");
        }
    }

    queue.done(&item);
    true
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
