use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel;
use crossbeam_utils::sync::WaitGroup;
use jobpool::{
    from_fn, try_from_fn, JobError, JobFuture, NamedThreadFactory, PoolConfig, PoolError, ThreadFactory,
    ThreadPool,
};

/// Occupies a pool thread until released.
fn block_thread(pool: &ThreadPool) -> (JobFuture<()>, channel::Sender<()>) {
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let future = pool
        .spawn(move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
    started_rx.recv().unwrap();
    (future, release_tx)
}

#[test]
fn spawn_returns_value() {
    let pool = ThreadPool::new(2).unwrap();
    let future = pool.spawn(|_| 6 * 7).unwrap();
    assert_eq!(future.get(), Ok(&42));
    assert!(future.is_done());
}

#[test]
fn concurrent_getters_see_same_value_after_job_finishes() {
    let pool = ThreadPool::new(2).unwrap();
    let start = Instant::now();
    let future = pool
        .spawn(|_| {
            thread::sleep(Duration::from_millis(50));
            42
        })
        .unwrap();

    let getters: Vec<_> = (0..2)
        .map(|_| {
            let future = future.clone();
            thread::spawn(move || {
                let value = *future.get().unwrap();
                (value, start.elapsed())
            })
        })
        .collect();

    for getter in getters {
        let (value, elapsed) = getter.join().unwrap();
        assert_eq!(value, 42);
        assert!(elapsed >= Duration::from_millis(50));
    }
}

#[test]
fn is_done_flips_only_after_job_returns() {
    let pool = ThreadPool::new(1).unwrap();
    let (future, release) = block_thread(&pool);

    thread::sleep(Duration::from_millis(20));
    assert!(!future.is_done());

    release.send(()).unwrap();
    future.wait_done();
    for _ in 0..10 {
        assert!(future.is_done());
    }
}

#[test]
fn listener_runs_once_after_done() {
    let pool = ThreadPool::new(2).unwrap();
    let (tx, rx) = channel::unbounded();
    let future = pool
        .submit_with_listener(try_from_fn(|_| Ok::<_, io::Error>("hi")), move |f| {
            tx.send((f.is_done(), f.get().map(|s| s.to_string()))).unwrap();
        })
        .unwrap();

    let (done, value) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(done);
    assert_eq!(value, Ok("hi".to_owned()));
    assert_eq!(future.get(), Ok(&"hi"));

    // The listener closure (and its sender) is gone once it ran.
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn job_error_completes_future_with_failure() {
    let pool = ThreadPool::new(1).unwrap();
    let future = pool
        .submit(try_from_fn(|_| -> Result<u8, io::Error> {
            Err(io::Error::new(io::ErrorKind::Other, "no route"))
        }))
        .unwrap();

    assert_eq!(future.get(), Err(JobError::Failed("no route".to_owned())));
    assert!(future.is_done());
}

#[test]
fn panicking_job_does_not_kill_pool_thread() {
    let pool = ThreadPool::new(1).unwrap();
    let future = pool.spawn(|_| -> u32 { panic!("boom") }).unwrap();
    assert_eq!(future.get(), Err(JobError::Panicked("boom".to_owned())));

    let next = pool.spawn(|_| 1).unwrap();
    assert_eq!(next.get(), Ok(&1));
    assert_eq!(pool.stats().live_threads, 1);
}

#[test]
fn panicking_listener_is_contained() {
    let pool = ThreadPool::new(1).unwrap();
    let future = pool
        .submit_with_listener(jobpool::from_fn(|_| 3), |_| panic!("listener"))
        .unwrap();
    assert_eq!(future.get(), Ok(&3));

    let next = pool.spawn(|_| 4).unwrap();
    assert_eq!(next.get(), Ok(&4));
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let pool = ThreadPool::new(2).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_shutdown());

    let r = ran.clone();
    let result = pool.spawn(move |_| {
        r.fetch_add(1, Ordering::SeqCst);
    });
    assert!(matches!(result, Err(PoolError::Shutdown)));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(pool.stats().submitted, 0);
}

#[test]
fn queued_jobs_run_after_shutdown() {
    let pool = ThreadPool::new(1).unwrap();
    let (blocker, release) = block_thread(&pool);
    let queued: Vec<_> = (0..4).map(|i| pool.spawn(move |_| i).unwrap()).collect();

    pool.shutdown();
    release.send(()).unwrap();

    assert_eq!(blocker.get(), Ok(&()));
    for (i, future) in queued.iter().enumerate() {
        assert_eq!(future.get(), Ok(&i));
    }
    pool.await_termination();
    assert_eq!(pool.stats().live_threads, 0);
}

#[test]
fn dropping_pool_lets_queued_jobs_finish() {
    let pool = ThreadPool::new(1).unwrap();
    let (blocker, release) = block_thread(&pool);
    let queued = pool.spawn(|_| "late").unwrap();

    drop(pool);
    release.send(()).unwrap();

    blocker.wait_done();
    assert_eq!(queued.get(), Ok(&"late"));
}

#[test]
fn single_thread_runs_jobs_in_fifo_order() {
    let pool = ThreadPool::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let futures: Vec<_> = (0..16)
        .map(|i| {
            let order = order.clone();
            pool.spawn(move |_| order.lock().unwrap().push(i)).unwrap()
        })
        .collect();
    for future in &futures {
        future.wait_done();
    }
    assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
}

#[test]
fn concurrency_never_exceeds_thread_count() {
    let pool = ThreadPool::new(3).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let wg = WaitGroup::new();

    for _ in 0..24 {
        let running = running.clone();
        let peak = peak.clone();
        let wg = wg.clone();
        pool.spawn(move |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            drop(wg);
        })
        .unwrap();
    }

    wg.wait();
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[test]
fn stats_track_outcomes() {
    let pool = ThreadPool::new(2).unwrap();
    let ok = pool.spawn(|_| 1).unwrap();
    let failed = pool
        .submit(try_from_fn(|_| Err::<u8, _>(io::Error::new(io::ErrorKind::Other, "x"))))
        .unwrap();
    ok.wait_done();
    failed.wait_done();

    let stats = pool.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.live_threads, 2);
    assert_eq!(stats.queued, 0);
}

#[test]
fn job_ids_are_unique() {
    let pool = ThreadPool::new(2).unwrap();
    let a = pool.spawn(|_| ()).unwrap();
    let b = pool.spawn(|_| ()).unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn bounded_queue_grows_then_rejects() {
    let config = PoolConfig::fixed(1)
        .with_max_threads(2)
        .with_queue_capacity(1)
        .with_keep_alive(Duration::from_millis(50));
    let pool = ThreadPool::with_config(config).unwrap();

    let (first, release_first) = block_thread(&pool);
    let queued = pool.spawn(|_| "queued").unwrap();

    // Queue is full: this one starts a second thread and runs on it.
    let (extra, release_extra) = block_thread(&pool);
    assert_eq!(pool.stats().live_threads, 2);

    // Queue full and both threads busy.
    let rejected = pool.spawn(|_| "rejected");
    assert!(matches!(rejected, Err(PoolError::QueueFull)));

    release_extra.send(()).unwrap();
    release_first.send(()).unwrap();
    first.wait_done();
    extra.wait_done();
    assert_eq!(queued.get(), Ok(&"queued"));

    // The extra thread retires after its keep-alive.
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.stats().live_threads > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pool.stats().live_threads, 1);
}

#[test]
fn threads_are_named_from_config() {
    let pool = ThreadPool::with_config(PoolConfig::fixed(1).with_thread_name_prefix("render"))
        .unwrap();
    let name = pool
        .spawn(|_| thread::current().name().map(str::to_owned))
        .unwrap();
    assert_eq!(name.get(), Ok(&Some("render-0".to_owned())));
}

struct CountingFactory {
    inner: NamedThreadFactory,
    started: Arc<AtomicUsize>,
}

impl ThreadFactory for CountingFactory {
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.inner.new_thread(body)
    }
}

#[test]
fn custom_factory_starts_core_threads() {
    let started = Arc::new(AtomicUsize::new(0));
    let factory = CountingFactory {
        inner: NamedThreadFactory::new("counted"),
        started: started.clone(),
    };
    let pool = ThreadPool::with_factory(PoolConfig::fixed(3), factory).unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 3);

    let future = pool.spawn(|_| true).unwrap();
    assert_eq!(future.get(), Ok(&true));
}

struct FailingFactory;

impl ThreadFactory for FailingFactory {
    fn new_thread(&self, _body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        Err(io::Error::new(io::ErrorKind::Other, "no threads today"))
    }
}

#[test]
fn factory_failure_is_reported() {
    let result = ThreadPool::with_factory(PoolConfig::fixed(2), FailingFactory);
    assert!(matches!(result, Err(PoolError::Spawn(_))));
}

#[test]
fn invalid_config_is_rejected() {
    let result = ThreadPool::with_config(PoolConfig::fixed(2).with_max_threads(1));
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}

#[test]
fn job_can_wait_on_another_future() {
    let pool = ThreadPool::new(2).unwrap();
    let inner = pool.spawn(|_| 20).unwrap();
    let outer = pool.spawn(move |_| inner.get().map(|v| v + 1)).unwrap();
    assert_eq!(outer.get(), Ok(&Ok(21)));
}

/// Config where a second submission beyond a blocked core thread and one
/// queued job has to start an extra thread.
fn overflow_config() -> PoolConfig {
    PoolConfig::fixed(1).with_max_threads(2).with_queue_capacity(1)
}

enum Misbehave {
    Fail,
    DropBody,
}

/// Starts the first `healthy` threads normally, then misbehaves.
struct FlakyFactory {
    inner: NamedThreadFactory,
    calls: AtomicUsize,
    healthy: usize,
    mode: Misbehave,
}

impl FlakyFactory {
    fn new(healthy: usize, mode: Misbehave) -> Self {
        FlakyFactory {
            inner: NamedThreadFactory::new("flaky"),
            calls: AtomicUsize::new(0),
            healthy,
            mode,
        }
    }
}

impl ThreadFactory for FlakyFactory {
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy {
            return self.inner.new_thread(body);
        }
        match self.mode {
            Misbehave::Fail => Err(io::Error::new(io::ErrorKind::Other, "out of threads")),
            Misbehave::DropBody => {
                drop(body);
                thread::Builder::new().spawn(|| {})
            }
        }
    }
}

#[test]
fn extra_thread_spawn_failure_rejects_submission() {
    let pool = ThreadPool::with_factory(overflow_config(), FlakyFactory::new(1, Misbehave::Fail))
        .unwrap();
    let (blocker, release) = block_thread(&pool);
    let queued = pool.spawn(|_| "queued").unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let result = pool.submit_with_listener(from_fn(|_| "never"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(matches!(result, Err(PoolError::Spawn(_))));

    let stats = pool.stats();
    assert_eq!(stats.live_threads, 1);
    assert_eq!(stats.submitted, 2);

    release.send(()).unwrap();
    blocker.wait_done();
    assert_eq!(queued.get(), Ok(&"queued"));
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[test]
fn job_dropped_by_factory_completes_as_abandoned() {
    let pool =
        ThreadPool::with_factory(overflow_config(), FlakyFactory::new(1, Misbehave::DropBody))
            .unwrap();
    let (blocker, release) = block_thread(&pool);
    let queued = pool.spawn(|_| "queued").unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let counter = notified.clone();
        let future = pool
            .submit_with_listener(from_fn(|_| "lost"), move |f| {
                assert!(f.is_done());
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(future.get(), Err(JobError::Abandoned));
        // The discarded thread gave its slot back, so the next overflow
        // tries again instead of hitting the thread limit.
        assert_eq!(pool.stats().live_threads, 1);
    }
    assert_eq!(notified.load(Ordering::SeqCst), 2);

    release.send(()).unwrap();
    blocker.wait_done();
    assert_eq!(queued.get(), Ok(&"queued"));
    pool.await_termination();
    assert_eq!(pool.stats().live_threads, 0);
}

/// Blocks its second thread start until the gate opens.
struct GatedFactory {
    inner: NamedThreadFactory,
    calls: AtomicUsize,
    entered: channel::Sender<()>,
    gate: channel::Receiver<()>,
}

impl ThreadFactory for GatedFactory {
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.entered.send(()).unwrap();
            self.gate.recv().unwrap();
        }
        self.inner.new_thread(body)
    }
}

#[test]
fn slow_factory_does_not_block_shutdown() {
    let (entered_tx, entered_rx) = channel::bounded(1);
    let (gate_tx, gate_rx) = channel::bounded(1);
    let factory = GatedFactory {
        inner: NamedThreadFactory::new("gated"),
        calls: AtomicUsize::new(0),
        entered: entered_tx,
        gate: gate_rx,
    };
    let pool = ThreadPool::with_factory(overflow_config(), factory).unwrap();
    let (blocker, release) = block_thread(&pool);
    let queued = pool.spawn(|_| "queued").unwrap();

    let pool = &pool;
    thread::scope(|s| {
        let submitter = s.spawn(move || pool.spawn(|_| "extra"));
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = channel::bounded(1);
        s.spawn(move || {
            pool.shutdown();
            done_tx.send(()).unwrap();
        });
        let shut_down = done_rx.recv_timeout(Duration::from_secs(5)).is_ok();
        gate_tx.send(()).unwrap();
        assert!(shut_down, "shutdown waited on the thread factory");
        assert!(pool.is_shutdown());

        // Admitted before shutdown, so it still runs.
        let extra = submitter.join().unwrap().unwrap();
        assert_eq!(extra.get(), Ok(&"extra"));
    });

    release.send(()).unwrap();
    blocker.wait_done();
    assert_eq!(queued.get(), Ok(&"queued"));
    pool.await_termination();
    assert_eq!(pool.stats().live_threads, 0);
}

#[test]
fn submissions_racing_shutdown_fail_or_complete() {
    let pool = ThreadPool::new(2).unwrap();
    let pool = &pool;
    let accepted = thread::scope(|s| {
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || {
                    let mut futures = Vec::new();
                    for i in 0..200u32 {
                        match pool.spawn(move |_| i) {
                            Ok(future) => futures.push((i, future)),
                            Err(e) => {
                                assert!(matches!(e, PoolError::Shutdown));
                                break;
                            }
                        }
                    }
                    futures
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(1));
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(pool.spawn(|_| 0), Err(PoolError::Shutdown)));

        submitters
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    for (i, future) in &accepted {
        assert_eq!(future.get(), Ok(i));
    }
    assert_eq!(pool.stats().submitted, accepted.len() as u64);
    pool.await_termination();
}
