use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::channel::RecvTimeoutError;
use log::debug;

use super::worker::Task;
use super::Inner;

/// A task handed directly to a freshly started thread.
///
/// Kept outside the thread closure so the submitter can take it back and
/// reject it if the thread fails to start.
pub(super) type Handoff = Arc<Mutex<Option<Task>>>;

pub(super) fn take_handoff(slot: &Handoff) -> Option<Task> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// One counted entry in `live_threads`, given back when dropped.
///
/// Owned by the thread body, so the count stays right when a thread exits,
/// when the factory fails, and when the factory drops the body unrun.
pub(super) struct LiveSlot {
    inner: Arc<Inner>,
    held: bool,
}

impl LiveSlot {
    /// Takes over a slot the caller already added to `live_threads`.
    pub(super) fn new(inner: Arc<Inner>) -> Self {
        LiveSlot { inner, held: true }
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        if self.held {
            self.inner.live_threads.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

enum Next {
    Task(Task),
    Retired,
    Closed,
}

/// Body of every pool thread.
///
/// Threads pull workers from the shared admission queue until the queue is
/// closed and drained. Threads above the core count give up after sitting
/// idle for the keep-alive period.
pub(super) fn worker_loop(mut slot: LiveSlot, first: Option<Handoff>) {
    let name = std::thread::current().name().unwrap_or("pool").to_owned();
    debug!("{name} started");

    let mut pending = first.as_ref().and_then(take_handoff);
    loop {
        let task = match pending.take() {
            Some(task) => task,
            None => match next_task(&slot.inner) {
                Next::Task(task) => task,
                Next::Retired => {
                    // Already uncounted by the keep-alive check.
                    slot.held = false;
                    debug!("{name} idle past keep-alive, retiring");
                    return;
                }
                Next::Closed => {
                    debug!("{name}: queue closed, shutting down");
                    return;
                }
            },
        };
        debug!("{name} executing job {}", task.id());
        task.run();
    }
}

fn next_task(inner: &Inner) -> Next {
    let core = inner.config.core_threads;
    loop {
        if inner.live_threads.load(Ordering::SeqCst) <= core {
            return match inner.receiver.recv() {
                Ok(task) => Next::Task(task),
                Err(_) => Next::Closed,
            };
        }
        match inner.receiver.recv_timeout(inner.config.keep_alive) {
            Ok(task) => return Next::Task(task),
            Err(RecvTimeoutError::Disconnected) => return Next::Closed,
            Err(RecvTimeoutError::Timeout) => {
                let retired = inner
                    .live_threads
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n > core).then(|| n - 1)
                    })
                    .is_ok();
                if retired {
                    return Next::Retired;
                }
            }
        }
    }
}
