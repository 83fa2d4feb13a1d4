use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};

use crate::error::JobError;
use crate::job::{CancelState, JobContext};

/// Callback invoked once, on the pool thread, after a job completes.
pub type CompletionListener<T> = Box<dyn FnOnce(&JobFuture<T>) + Send + 'static>;

/// The record shared by a job's future, its context and the pool thread.
struct Completion<T> {
    id: u64,
    cancel: Arc<CancelState>,
    /// Set exactly once. Its presence is the completion flag.
    outcome: OnceLock<Result<T, JobError>>,
    /// Guards waiter sleep against a concurrent completion.
    lock: Mutex<()>,
    done: Condvar,
}

/// Handle to the eventual outcome of a submitted job.
///
/// Cloning the handle is cheap; every clone observes the same job. Any
/// number of threads may wait on it or request cancellation concurrently.
pub struct JobFuture<T> {
    inner: Arc<Completion<T>>,
}

impl<T> JobFuture<T> {
    pub(crate) fn new(id: u64) -> Self {
        JobFuture {
            inner: Arc::new(Completion {
                id,
                cancel: Arc::new(CancelState::default()),
                outcome: OnceLock::new(),
                lock: Mutex::new(()),
                done: Condvar::new(),
            }),
        }
    }

    /// Pool-unique id of the job.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Requests cooperative cancellation.
    ///
    /// Runs the job's registered cancel callback, if any, on the calling
    /// thread. A running job is never interrupted; it is up to the job to
    /// poll [`JobContext::is_cancelled`] or react to its callback. Calling
    /// this more than once, or after the job finished, has no further effect
    /// beyond the flag.
    pub fn cancel(&self) {
        if self.inner.cancel.cancel() {
            log::debug!("job {} cancellation requested", self.inner.id);
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Returns `true` once the job's outcome is fixed. Never blocks.
    pub fn is_done(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// Blocks until the job completes and returns its outcome.
    ///
    /// Every caller, on every clone, sees the same outcome.
    pub fn get(&self) -> Result<&T, JobError> {
        match self.outcome() {
            Ok(value) => Ok(value),
            Err(e) => Err(e.clone()),
        }
    }

    /// Blocks until the job completes, discarding the outcome.
    pub fn wait_done(&self) {
        self.outcome();
    }

    fn outcome(&self) -> &Result<T, JobError> {
        if let Some(outcome) = self.inner.outcome.get() {
            return outcome;
        }
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = self.inner.outcome.get() {
                return outcome;
            }
            guard = self
                .inner
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn context(&self) -> JobContext {
        JobContext::new(self.inner.cancel.clone())
    }

    /// Publishes the outcome and wakes every waiter.
    ///
    /// Returns `false` if an outcome was already published.
    pub(crate) fn complete(&self, outcome: Result<T, JobError>) -> bool {
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.inner.outcome.set(outcome).is_err() {
            return false;
        }
        self.inner.done.notify_all();
        true
    }
}

impl<T> Clone for JobFuture<T> {
    fn clone(&self) -> Self {
        JobFuture {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("id", &self.inner.id)
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
