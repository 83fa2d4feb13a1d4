use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::future::{CompletionListener, JobFuture};
use crate::job::{from_fn, Job, JobContext};
use crate::{PoolError, Result};

use self::shared_queue::{take_handoff, worker_loop, Handoff, LiveSlot};
use self::worker::{Task, Worker};

mod factory;
mod shared_queue;
mod worker;

pub use self::factory::{NamedThreadFactory, ThreadFactory};

/// Snapshot of a pool's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Threads currently alive.
    pub live_threads: usize,
    /// Jobs admitted but not yet picked up by a thread.
    pub queued: usize,
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Jobs that produced a value.
    pub completed: u64,
    /// Jobs that failed, panicked or were abandoned.
    pub failed: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// A bounded pool of threads executing [`Job`]s from a FIFO admission queue.
///
/// `core_threads` threads are started up front and live until shutdown.
/// With a bounded queue, a full queue starts extra threads up to
/// `max_threads`; those exit after idling for `keep_alive`. Once both the
/// queue and the thread budget are exhausted, submissions fail with
/// [`PoolError::QueueFull`].
///
/// Dropping the pool shuts it down. Queued jobs still run.
pub struct ThreadPool {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: PoolConfig,
    factory: Box<dyn ThreadFactory>,
    /// Taken on shutdown, which closes the queue once it drains.
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    shutdown: AtomicBool,
    live_threads: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl ThreadPool {
    /// Creates a pool with exactly `threads` threads and an unbounded queue.
    pub fn new(threads: u32) -> Result<Self> {
        Self::with_config(PoolConfig::fixed(threads as usize))
    }

    /// Creates a pool whose threads come from a [`NamedThreadFactory`].
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let factory = NamedThreadFactory::new(config.thread_name_prefix.clone())
            .with_stack_size(config.stack_size);
        Self::with_factory(config, factory)
    }

    /// Creates a pool whose threads are started by `factory`.
    pub fn with_factory(config: PoolConfig, factory: impl ThreadFactory) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = match config.queue_capacity {
            Some(capacity) => channel::bounded::<Task>(capacity),
            None => channel::unbounded::<Task>(),
        };
        let core_threads = config.core_threads;
        let pool = ThreadPool {
            inner: Arc::new(Inner {
                config,
                factory: Box::new(factory),
                sender: RwLock::new(Some(tx)),
                receiver: rx,
                shutdown: AtomicBool::new(false),
                live_threads: AtomicUsize::new(0),
                handles: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                counters: Arc::new(Counters::default()),
            }),
        };

        for _ in 0..core_threads {
            pool.inner.live_threads.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = pool.inner.start_thread(None) {
                error!("Failed to start pool thread: {e}");
                return Err(PoolError::Spawn(e));
            }
        }
        info!("Thread pool started with {core_threads} core threads");

        Ok(pool)
    }

    /// Submits a job and returns its future without waiting for it to start.
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] once [`shutdown`](Self::shutdown) was called;
    /// [`PoolError::QueueFull`] when a bounded queue is full and the pool
    /// already runs `max_threads` threads. The job is dropped unrun in both
    /// cases.
    pub fn submit<J: Job>(&self, job: J) -> Result<JobFuture<J::Output>> {
        self.dispatch(job, None)
    }

    /// Like [`submit`](Self::submit), also running `listener` on the pool
    /// thread once the job's future is done.
    pub fn submit_with_listener<J, F>(&self, job: J, listener: F) -> Result<JobFuture<J::Output>>
    where
        J: Job,
        F: FnOnce(&JobFuture<J::Output>) + Send + 'static,
    {
        let listener: CompletionListener<J::Output> = Box::new(listener);
        self.dispatch(job, Some(listener))
    }

    /// Submits a closure as a job.
    pub fn spawn<F, T>(&self, f: F) -> Result<JobFuture<T>>
    where
        F: FnOnce(&JobContext) -> T + Send + 'static,
        T: Send + Sync + 'static,
    {
        self.submit(from_fn(f))
    }

    fn dispatch<J: Job>(
        &self,
        job: J,
        listener: Option<CompletionListener<J::Output>>,
    ) -> Result<JobFuture<J::Output>> {
        let inner = &self.inner;
        let (future, full) = {
            let sender = inner.sender.read().unwrap_or_else(PoisonError::into_inner);
            let Some(sender) = sender.as_ref() else {
                warn!("Rejecting job: pool is shut down");
                return Err(PoolError::Shutdown);
            };

            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (worker, future) = Worker::new(id, job, listener, inner.counters.clone());
            match sender.try_send(Box::new(worker)) {
                Ok(()) => (future, None),
                Err(TrySendError::Full(task)) => (future, Some(task)),
                Err(TrySendError::Disconnected(task)) => {
                    error!("Job {id} rejected: admission queue disconnected");
                    task.reject();
                    return Err(PoolError::Shutdown);
                }
            }
        };

        // The factory may block, so extra threads start without the
        // admission lock held.
        if let Some(task) = full {
            if inner.shutdown.load(Ordering::SeqCst) {
                warn!("Job {} rejected: pool shut down while queue was full", task.id());
                task.reject();
                return Err(PoolError::Shutdown);
            }
            inner.overflow(task)?;
        }
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(future)
    }

    /// Stops admitting jobs. Idempotent.
    ///
    /// Jobs already queued or running are neither cancelled nor interrupted;
    /// threads exit once the queue is drained.
    ///
    /// A submission racing with shutdown either fails with
    /// [`PoolError::Shutdown`] or is accepted and runs.
    pub fn shutdown(&self) {
        let mut sender = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        sender.take();
        drop(sender);
        info!("Thread pool shutting down");
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Shuts the pool down and blocks until every pool thread has exited.
    ///
    /// Called from inside a job, the calling thread is not waited for.
    pub fn await_termination(&self) {
        self.shutdown();
        let current = thread::current().id();
        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.thread().id() == current {
                    continue;
                }
                if handle.join().is_err() {
                    error!("Pool thread panicked");
                }
            }
        }
    }

    /// Returns a snapshot of the pool's activity.
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            live_threads: inner.live_threads.load(Ordering::SeqCst),
            queued: inner.receiver.len(),
            submitted: inner.counters.submitted.load(Ordering::Relaxed),
            completed: inner.counters.completed.load(Ordering::Relaxed),
            failed: inner.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// The configuration the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    /// Starts a thread; the caller has already counted it in `live_threads`.
    ///
    /// The slot travels with the thread body and is released when the body
    /// finishes or is dropped, including when the factory fails.
    fn start_thread(self: &Arc<Self>, first: Option<Handoff>) -> std::io::Result<()> {
        let slot = LiveSlot::new(self.clone());
        let handle = self
            .factory
            .new_thread(Box::new(move || worker_loop(slot, first)))?;
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    /// Handles a submission that found the bounded queue full.
    fn overflow(self: &Arc<Self>, task: Task) -> Result<()> {
        let max = self.config.max_threads;
        let reserved = self
            .live_threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then(|| n + 1))
            .is_ok();
        if !reserved {
            warn!(
                "Job {} rejected: admission queue full and {max} threads running",
                task.id()
            );
            task.reject();
            return Err(PoolError::QueueFull);
        }

        debug!("Admission queue full, starting extra thread for job {}", task.id());
        let handoff: Handoff = Arc::new(Mutex::new(Some(task)));
        if let Err(e) = self.start_thread(Some(handoff.clone())) {
            error!("Failed to start extra pool thread: {e}");
            if let Some(task) = take_handoff(&handoff) {
                task.reject();
            }
            return Err(PoolError::Spawn(e));
        }
        Ok(())
    }
}
