#![deny(missing_docs)]

//! A bounded worker-thread pool with blocking futures and cooperative
//! cancellation.
//!
//! Jobs are submitted to a [`ThreadPool`] and run at most once on one of its
//! threads. Each submission returns a [`JobFuture`] that can be polled,
//! waited on from any number of threads, or asked to cancel. Cancellation is
//! advisory: a running job observes it through its [`JobContext`], either by
//! polling or by registering a callback.
//!
//! ```no_run
//! use jobpool::ThreadPool;
//!
//! # fn main() -> jobpool::Result<()> {
//! let pool = ThreadPool::new(4)?;
//! let future = pool.spawn(|ctx| {
//!     let mut sum = 0u64;
//!     for i in 0..1_000 {
//!         if ctx.is_cancelled() {
//!             break;
//!         }
//!         sum += i;
//!     }
//!     sum
//! })?;
//! assert_eq!(future.get(), Ok(&499_500));
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod future;
mod job;
/// The pool, its threads and the thread-creation strategy.
pub mod thread_pool;

pub use config::PoolConfig;
pub use error::{BoxError, JobError, PoolError, Result};
pub use future::{CompletionListener, JobFuture};
pub use job::{from_fn, try_from_fn, CancelCallback, FnJob, Job, JobContext, TryFnJob};
pub use thread_pool::{NamedThreadFactory, PoolStats, ThreadFactory, ThreadPool};
