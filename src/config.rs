use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PoolError, Result};

const DEFAULT_CORE_THREADS: usize = 4;
const DEFAULT_MAX_THREADS: usize = 8;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);
const DEFAULT_THREAD_NAME_PREFIX: &str = "jobpool";

/// Sizing and admission settings of a [`ThreadPool`](crate::ThreadPool).
///
/// Deserializes from JSON; missing fields take their defaults and
/// `keep_alive` is written as `keep_alive_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Threads kept alive for the whole life of the pool.
    pub core_threads: usize,
    /// Upper bound on threads. Only reachable with a bounded queue.
    pub max_threads: usize,
    /// How long a thread above `core_threads` may sit idle before exiting.
    #[serde(rename = "keep_alive_ms", with = "millis")]
    pub keep_alive: Duration,
    /// Capacity of the admission queue; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Pool threads are named `"{thread_name_prefix}-{n}"`.
    pub thread_name_prefix: String,
    /// Stack size of pool threads in bytes; `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            core_threads: DEFAULT_CORE_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// A pool with exactly `threads` threads and an unbounded queue.
    pub fn fixed(threads: usize) -> Self {
        PoolConfig {
            core_threads: threads,
            max_threads: threads,
            ..Default::default()
        }
    }

    /// One core thread per CPU, growing to twice that under backpressure.
    pub fn for_cpus() -> Self {
        let cpus = num_cpus::get();
        PoolConfig {
            core_threads: cpus,
            max_threads: cpus * 2,
            ..Default::default()
        }
    }

    /// Parses a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the core thread count.
    pub fn with_core_threads(mut self, core_threads: usize) -> Self {
        self.core_threads = core_threads;
        self
    }

    /// Sets the maximum thread count.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the idle timeout of threads above the core count.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Bounds the admission queue.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the stack size of pool threads.
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Checks that the settings describe a usable pool.
    pub fn validate(&self) -> Result<()> {
        if self.core_threads == 0 {
            return Err(PoolError::InvalidConfig(
                "core_threads must be at least 1".to_owned(),
            ));
        }
        if self.max_threads < self.core_threads {
            return Err(PoolError::InvalidConfig(format!(
                "max_threads ({}) is smaller than core_threads ({})",
                self.max_threads, self.core_threads
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
