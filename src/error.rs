use std::io;
use thiserror::Error;

/// Error type for pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been shut down and accepts no new jobs.
    #[error("thread pool is shut down")]
    Shutdown,

    /// The bounded admission queue is full and no extra thread may be started.
    #[error("admission queue is full")]
    QueueFull,

    /// A pool thread could not be spawned.
    #[error("failed to spawn pool thread: {0}")]
    Spawn(io::Error),

    /// The pool configuration is inconsistent.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration deserialization error.
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Boxed error a job may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a job produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job returned an error.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was dropped by the pool without ever running.
    #[error("job was abandoned before it ran")]
    Abandoned,
}
