use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// Strategy used by a [`ThreadPool`](super::ThreadPool) to start its threads.
///
/// Implementors decide naming, stack size or any platform tuning; the pool
/// only needs a thread that runs `body`.
pub trait ThreadFactory: Send + Sync + 'static {
    /// Starts a new thread running `body`.
    ///
    /// `body` must either run or be dropped. The pool counts the thread as
    /// live until one of the two happens, and a job handed to a thread
    /// whose body is dropped unrun completes with
    /// [`JobError::Abandoned`](crate::JobError::Abandoned).
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>>;
}

/// Names threads `"{prefix}-{n}"` with a per-factory counter.
pub struct NamedThreadFactory {
    prefix: String,
    stack_size: Option<usize>,
    next: AtomicUsize,
}

impl NamedThreadFactory {
    /// Creates a factory with the given thread name prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        NamedThreadFactory {
            prefix: prefix.into(),
            stack_size: None,
            next: AtomicUsize::new(0),
        }
    }

    /// Sets the stack size, in bytes, of every thread started.
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.prefix, n));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(body)
    }
}
