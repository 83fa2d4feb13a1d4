use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::BoxError;

/// Callback a running job registers to hear about cancellation.
pub type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// A single-shot unit of work executed by a [`ThreadPool`](crate::ThreadPool).
///
/// The job is consumed by the pool thread that runs it. It only ever sees
/// the [`JobContext`] of its own submission, through which it can observe
/// cooperative cancellation.
pub trait Job: Send + 'static {
    /// The value produced on success.
    type Output: Send + Sync + 'static;

    /// Runs the job to completion.
    ///
    /// Returning an error (or panicking) completes the job's future with a
    /// [`JobError`](crate::JobError) instead of a value.
    fn run(self, ctx: &JobContext) -> Result<Self::Output, BoxError>;
}

/// A [`Job`] built from an infallible closure. See [`from_fn`].
pub struct FnJob<F>(F);

/// Wraps a closure returning a plain value into a [`Job`].
pub fn from_fn<F, T>(f: F) -> FnJob<F>
where
    F: FnOnce(&JobContext) -> T + Send + 'static,
    T: Send + Sync + 'static,
{
    FnJob(f)
}

impl<F, T> Job for FnJob<F>
where
    F: FnOnce(&JobContext) -> T + Send + 'static,
    T: Send + Sync + 'static,
{
    type Output = T;

    fn run(self, ctx: &JobContext) -> Result<T, BoxError> {
        Ok((self.0)(ctx))
    }
}

/// A [`Job`] built from a fallible closure. See [`try_from_fn`].
pub struct TryFnJob<F>(F);

/// Wraps a closure returning `Result` into a [`Job`].
pub fn try_from_fn<F, T, E>(f: F) -> TryFnJob<F>
where
    F: FnOnce(&JobContext) -> Result<T, E> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<BoxError>,
{
    TryFnJob(f)
}

impl<F, T, E> Job for TryFnJob<F>
where
    F: FnOnce(&JobContext) -> Result<T, E> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<BoxError>,
{
    type Output = T;

    fn run(self, ctx: &JobContext) -> Result<T, BoxError> {
        (self.0)(ctx).map_err(Into::into)
    }
}

/// The view of its own cancellation state handed to a running job.
pub struct JobContext {
    cancel: Arc<CancelState>,
}

impl JobContext {
    pub(crate) fn new(cancel: Arc<CancelState>) -> Self {
        JobContext { cancel }
    }

    /// Returns `true` once cancellation has been requested for this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Registers `callback` to run when the job is cancelled.
    ///
    /// Replaces any previously registered callback. If cancellation was
    /// already requested, `callback` runs immediately on the calling thread.
    pub fn set_cancel_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel.register(Box::new(callback));
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancellation flag plus the single callback slot.
///
/// The flag only ever flips while the slot lock is held, so a callback is
/// either stored before the flip (and taken by `cancel`) or sees the flag
/// already set (and runs at registration). Callbacks run outside the lock.
#[derive(Default)]
pub(crate) struct CancelState {
    cancelled: AtomicBool,
    callback: Mutex<Option<CancelCallback>>,
}

impl CancelState {
    /// Requests cancellation. Returns `false` if it was already requested.
    pub(crate) fn cancel(&self) -> bool {
        let callback = {
            let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return false;
            }
            slot.take()
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn register(&self, callback: CancelCallback) {
        let run_now = {
            let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if self.cancelled.load(Ordering::Acquire) {
                Some(callback)
            } else {
                *slot = Some(callback);
                None
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
    }
}
