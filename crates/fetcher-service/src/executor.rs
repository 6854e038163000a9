//! Executors that run producer computations off the tick thread.
//!
//! An [`Executor`] only ever sees type-erased [`Job`]s. The typed result travels back to the
//! tick thread through a one-shot channel owned by the [`Pending`] handle, which is the only
//! piece of state that is shared between threads.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::clock::Timebase;
use crate::config::{ExecutorConfig, ExecutorKind};
use crate::task::Outcome;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The function a task computes its value with.
pub(crate) type Producer<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// Runs jobs, possibly on other threads.
pub trait Executor: Send + Sync + 'static {
    /// Schedules `job` to run exactly once.
    ///
    /// This must not block on the job's completion, except for executors that are explicitly
    /// synchronous such as [`InlineExecutor`].
    fn execute(&self, job: Job);
}

/// Creates the executor described by `config`.
pub fn from_config(config: &ExecutorConfig) -> Result<Arc<dyn Executor>> {
    let threads = config.threads;
    Ok(match config.kind {
        ExecutorKind::Runtime => Arc::new(RuntimeExecutor::with_threads(threads)?),
        ExecutorKind::Rayon => Arc::new(ThreadPoolExecutor::new(threads)?),
        ExecutorKind::Inline => Arc::new(InlineExecutor),
    })
}

/// Runs jobs as blocking tasks on a tokio runtime.
#[derive(Clone)]
pub struct RuntimeExecutor {
    handle: tokio::runtime::Handle,
    /// Keeps a runtime alive that was created by [`RuntimeExecutor::with_threads`].
    _runtime: Option<Arc<tokio::runtime::Runtime>>,
}

impl RuntimeExecutor {
    /// Uses an existing runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// Creates a dedicated runtime with `threads` blocking threads.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("fetcher-runtime")
            .build()
            .context("failed to create fetcher runtime")?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }
}

impl Executor for RuntimeExecutor {
    fn execute(&self, job: Job) {
        // the join handle is not needed, results come back through the `Pending` channel
        drop(self.handle.spawn_blocking(job));
    }
}

impl fmt::Debug for RuntimeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeExecutor")
            .field("owned", &self._runtime.is_some())
            .finish()
    }
}

/// Runs jobs on a dedicated rayon thread pool.
#[derive(Clone, Debug)]
pub struct ThreadPoolExecutor {
    pool: Arc<rayon::ThreadPool>,
}

impl ThreadPoolExecutor {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fetcher-pool-{i}"))
            .build()
            .context("failed to create fetcher thread pool")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Runs every job synchronously, right when it is submitted.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Queues jobs until [`run_pending`](Self::run_pending) is called.
///
/// This gives a driver full control over when computations finish, which makes the
/// interleaving of ticks and completions deterministic.
#[derive(Clone, Default)]
pub struct DeferredExecutor {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of jobs that were submitted but have not run yet.
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Runs all queued jobs on the calling thread, in submission order.
    ///
    /// Jobs submitted while this is running are run as well. Returns how many jobs ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // the lock must not be held while the job runs
            let job = self.queue.lock().unwrap().pop_front();
            let Some(job) = job else {
                return ran;
            };
            job();
            ran += 1;
        }
    }
}

impl Executor for DeferredExecutor {
    fn execute(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
    }
}

impl fmt::Debug for DeferredExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredExecutor")
            .field("queued", &self.queued())
            .finish()
    }
}

/// The handle to one in-flight computation.
///
/// Dropping it abandons the computation: the job still runs to completion, but its outcome
/// is discarded.
pub struct Pending<T> {
    receiver: oneshot::Receiver<Outcome<T>>,
    timebase: Timebase,
}

impl<T> Pending<T> {
    /// Returns the outcome if the computation has finished, without blocking.
    ///
    /// A job that was dropped by its executor without ever reporting back (for example
    /// because the executor shut down) counts as a failure at the time it is noticed.
    pub fn poll_if_done(&mut self) -> Option<Outcome<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Outcome::Failure {
                error: anyhow::anyhow!("computation was dropped before it completed"),
                completed_at: self.timebase.now(),
            }),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

/// Submits one invocation of `producer` to `executor`.
///
/// The job stamps its own completion time from `timebase` as soon as the producer returns.
/// Panics inside the producer are caught and reported as failures.
pub(crate) fn spawn_computation<T>(
    executor: &dyn Executor,
    timebase: &Timebase,
    task_id: Arc<str>,
    producer: Producer<T>,
) -> Pending<T>
where
    T: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let job_timebase = timebase.clone();

    let job = Box::new(move || {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| producer()));
        let completed_at = job_timebase.now();
        metric!(timer("computation.duration") = start.elapsed(), "task" => &task_id);

        let outcome = match result {
            Ok(Ok(value)) => Outcome::Success {
                value,
                completed_at,
            },
            Ok(Err(error)) => Outcome::Failure {
                error,
                completed_at,
            },
            Err(payload) => Outcome::Failure {
                error: anyhow::anyhow!("producer panicked: {}", panic_message(&*payload)),
                completed_at,
            },
        };

        if sender.send(outcome).is_err() {
            tracing::trace!(task = %task_id, "Discarding outcome of abandoned computation");
        }
    });
    executor.execute(job);

    Pending {
        receiver,
        timebase: timebase.clone(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
