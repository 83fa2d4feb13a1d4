use std::path::PathBuf;
use std::process::exit;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};

use jobpool::{BoxError, Job, JobContext, JobFuture, PoolConfig, Result, ThreadPool};

const STEP: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "jobpool", version, about = "Runs sleeping demo jobs on a bounded thread pool")]
struct Cli {
    /// JSON pool configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Core thread count (defaults to the number of CPUs)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Maximum thread count
    #[arg(long, value_name = "N")]
    max_threads: Option<usize>,

    /// Bound the admission queue to this many jobs
    #[arg(long, value_name = "N")]
    queue_capacity: Option<usize>,

    /// Number of jobs to submit
    #[arg(long, default_value_t = 8)]
    jobs: u32,

    /// How long each job works, in milliseconds
    #[arg(long, default_value_t = 100, value_name = "MS")]
    job_ms: u64,

    /// Cancel every Nth job right after submitting it (0 disables)
    #[arg(long, default_value_t = 0, value_name = "N")]
    cancel_every: u32,
}

/// Works in small steps, stopping early when cancelled.
struct SleepJob {
    index: u32,
    steps: u64,
}

impl Job for SleepJob {
    type Output = u64;

    fn run(self, ctx: &JobContext) -> std::result::Result<u64, BoxError> {
        let index = self.index;
        ctx.set_cancel_callback(move || debug!("Job #{index} received cancellation"));

        for done in 0..self.steps {
            if ctx.is_cancelled() {
                return Err(format!("cancelled after {done} of {} steps", self.steps).into());
            }
            thread::sleep(STEP);
        }
        Ok(self.steps)
    }
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    info!("jobpool {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Pool: {} core / {} max threads, queue {}",
        config.core_threads,
        config.max_threads,
        config
            .queue_capacity
            .map_or_else(|| "unbounded".to_owned(), |c| c.to_string())
    );

    let pool = ThreadPool::with_config(config)?;
    let steps = (cli.job_ms / STEP.as_millis() as u64).max(1);

    let mut futures: Vec<(u32, JobFuture<u64>)> = Vec::new();
    for index in 0..cli.jobs {
        let job = SleepJob { index, steps };
        let future = pool.submit_with_listener(job, move |f: &JobFuture<u64>| {
            debug!("Job #{index} finished (id {})", f.id());
        })?;
        if cli.cancel_every > 0 && (index + 1) % cli.cancel_every == 0 {
            future.cancel();
        }
        futures.push((index, future));
    }

    for (index, future) in &futures {
        match future.get() {
            Ok(steps) => println!("job {index}: ok after {steps} steps"),
            Err(e) => println!("job {index}: {e}"),
        }
    }

    pool.await_termination();
    let stats = pool.stats();
    info!(
        "Submitted {}, completed {}, failed {}",
        stats.submitted, stats.completed, stats.failed
    );
    Ok(())
}

/// Loads the file configuration, if any, and applies flag overrides.
fn resolve_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::for_cpus(),
    };
    if let Some(threads) = cli.threads {
        config.core_threads = threads;
        if cli.max_threads.is_none() {
            config.max_threads = config.max_threads.max(threads);
        }
    }
    if let Some(max) = cli.max_threads {
        config.max_threads = max;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = Some(capacity);
    }
    config.validate()?;
    Ok(config)
}
