//! Rate-limited work queue.
//!
//! Work is queued as keys instead of being processed as soon as a change
//! happens. The queue guarantees:
//!
//! - a key is queued at most once, no matter how often it is added
//! - a key is never handed to two workers at the same time: a key added while
//!   it is being processed is delivered again only after [`WorkQueue::done`]
//! - failed keys can be re-added after a per-key exponential backoff
//!
//! All queue bookkeeping lives behind a single mutex; waiting workers are
//! woken through a [`Notify`].

use crate::rate_limiter::{ExponentialFailureRateLimiter, RateLimiter};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    /// Keys ready to be handed out, in order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
}

/// A deduplicating, rate-limited queue of work keys.
///
/// Cloning is cheap; all clones share the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl WorkQueue {
    /// Creates a queue that uses `rate_limiter` for [`WorkQueue::add_rate_limited`].
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
            }),
        }
    }

    /// Creates a queue with the default exponential failure rate limiter (5ms base, 1000s cap).
    pub fn with_default_rate_limiter(name: impl Into<String>) -> Self {
        Self::new(name, ExponentialFailureRateLimiter::default())
    }

    /// Name of the queue (used in logs).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing.
    ///
    /// No-op if the key is already queued or the queue is shutting down. A key
    /// that is currently being processed is re-queued once it is marked done.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, %key, "key is being processed, deferring");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue is shutting down, even if keys are still
    /// queued. The caller must call [`WorkQueue::done`] with the returned key
    /// when it has finished processing it.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before inspecting the state so a concurrent
            // `add` or `shut_down` cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on; `notify_one` only stores one permit.
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks processing of `key` as finished.
    ///
    /// If the key was added again while it was being processed, it goes back
    /// on the queue now.
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Re-adds `key` after `delay`.
    ///
    /// Must be called from within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Re-adds `key` after the rate limiter's backoff delay for it.
    ///
    /// Returns the delay that was applied.
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = self.inner.rate_limiter.when(key);
        self.add_after(key, delay);
        delay
    }

    /// Resets the failure history of `key`.
    ///
    /// Call this when a key was processed successfully, or when it can never
    /// succeed and must not be retried with backoff.
    pub fn forget(&self, key: &str) {
        self.inner.rate_limiter.forget(key);
    }

    /// Number of times `key` has been re-added through [`WorkQueue::add_rate_limited`].
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no key is waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting keys and wakes every blocked [`WorkQueue::get`].
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
