use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use super::Counters;
use crate::error::JobError;
use crate::future::{CompletionListener, JobFuture};
use crate::job::Job;

/// A unit the pool threads can execute.
pub(crate) trait Runnable: Send {
    /// Runs the job and publishes its outcome.
    fn run(self: Box<Self>);

    /// Drops the job without running it and without notifying anyone.
    ///
    /// Used when admission fails and the caller gets an error instead of
    /// a future.
    fn reject(self: Box<Self>);

    fn id(&self) -> u64;
}

pub(crate) type Task = Box<dyn Runnable>;

/// Binds one job to its future and optional completion listener.
///
/// A worker dropped while still holding its job (never run) completes its
/// future with [`JobError::Abandoned`] so no waiter blocks forever.
pub(crate) struct Worker<J: Job> {
    job: Option<J>,
    listener: Option<CompletionListener<J::Output>>,
    future: JobFuture<J::Output>,
    counters: Arc<Counters>,
}

impl<J: Job> Worker<J> {
    pub(crate) fn new(
        id: u64,
        job: J,
        listener: Option<CompletionListener<J::Output>>,
        counters: Arc<Counters>,
    ) -> (Self, JobFuture<J::Output>) {
        let future = JobFuture::new(id);
        let worker = Worker {
            job: Some(job),
            listener,
            future: future.clone(),
            counters,
        };
        (worker, future)
    }

    fn execute(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        let id = self.future.id();
        debug!("Job {id} started");

        let ctx = self.future.context();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.run(&ctx))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Job {id} failed: {e}");
                Err(JobError::Failed(e.to_string()))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!("Job {id} panicked: {msg}");
                Err(JobError::Panicked(msg))
            }
        };
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Result<J::Output, JobError>) {
        let counter = if outcome.is_ok() {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if !self.future.complete(outcome) {
            return;
        }
        debug!("Job {} done", self.future.id());

        if let Some(listener) = self.listener.take() {
            let future = &self.future;
            if panic::catch_unwind(AssertUnwindSafe(|| listener(future))).is_err() {
                warn!("Completion listener of job {} panicked", future.id());
            }
        }
    }
}

impl<J: Job> Runnable for Worker<J> {
    fn run(mut self: Box<Self>) {
        self.execute();
    }

    fn reject(mut self: Box<Self>) {
        self.job = None;
        self.listener = None;
    }

    fn id(&self) -> u64 {
        self.future.id()
    }
}

impl<J: Job> Drop for Worker<J> {
    fn drop(&mut self) {
        if self.job.take().is_some() {
            warn!("Job {} dropped before it ran", self.future.id());
            self.finish(Err(JobError::Abandoned));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
