//! Scheduler bootstrap and shared state.
//!
//! A scheduler is started with [`start_sync`] or [`start_async`], which turn
//! the calling thread into worker 0, spawn the remaining workers and run a
//! root callable on the main queue. Code running inside the scheduler reaches
//! it through [`Scheduler::current`] or the free functions in
//! [`context`](crate::context).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::PinningStrategy;
use crate::error::{Result, SchedulerError};
use crate::fiber::{self, ParkingSlot};
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::{DEFAULT_SPIN_COUNT, QueueWrapper};
use crate::runnable::IntoJobs;
use crate::token::DependencyToken;
use crate::worker::{self, WorkerThread};

/// Smallest fiber stack accepted by [`SchedulerConfig::validate`].
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Configuration for a scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers, the starting thread included. Default: one per
    /// available CPU.
    pub thread_count: usize,
    /// Stack size for each fiber in bytes. Default: 256KB.
    pub stack_size: usize,
    /// Fibers pre-allocated per worker. Default: 4.
    pub initial_pool_size: usize,
    /// Failed pops before an idle worker sleeps. Default: 10,000.
    pub spin_count: usize,
    /// How spawned workers are pinned to cores. Default: no pinning.
    pub pinning: PinningStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_count: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            stack_size: 256 * 1024,
            initial_pool_size: 4,
            spin_count: DEFAULT_SPIN_COUNT,
            pinning: PinningStrategy::None,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `thread_count` workers.
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Self::default()
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_initial_pool_size(mut self, initial_pool_size: usize) -> Self {
        self.initial_pool_size = initial_pool_size;
        self
    }

    pub fn with_spin_count(mut self, spin_count: usize) -> Self {
        self.spin_count = spin_count;
        self
    }

    pub fn with_pinning(mut self, pinning: PinningStrategy) -> Self {
        self.pinning = pinning;
        self
    }

    /// Checks the configuration before any thread is started.
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "thread_count must be at least 1".into(),
            ));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedulerError::InvalidConfig(format!(
                "stack_size {} is below the minimum of {MIN_STACK_SIZE} bytes",
                self.stack_size
            )));
        }
        Ok(())
    }
}

/// Options for [`Scheduler::push_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Route the jobs to the main queue, run only by worker 0.
    pub to_main: bool,
    /// Attach the running job's token, so whoever waits on the running job
    /// also waits on the pushed ones.
    pub dependent: bool,
}

impl PushOptions {
    pub const fn new() -> Self {
        PushOptions {
            to_main: false,
            dependent: false,
        }
    }

    pub const fn to_main(mut self) -> Self {
        self.to_main = true;
        self
    }

    pub const fn dependent(mut self) -> Self {
        self.dependent = true;
        self
    }
}

/// Options for [`call_with`](crate::context::call_with).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Route the awaited jobs to the main queue.
    pub to_main: bool,
    /// Resume the caller on worker 0.
    pub return_main: bool,
}

impl CallOptions {
    pub const fn new() -> Self {
        CallOptions {
            to_main: false,
            return_main: false,
        }
    }

    pub const fn to_main(mut self) -> Self {
        self.to_main = true;
        self
    }

    pub const fn return_main(mut self) -> Self {
        self.return_main = true;
        self
    }
}

/// State shared by every worker of one scheduler.
pub(crate) struct Shared {
    pub(crate) queues: QueueWrapper,
    pub(crate) config: SchedulerConfig,
    running: Box<[AtomicBool]>,
    /// Next id handed to a spawned worker; 0 belongs to the starting thread.
    next_worker_id: Mutex<usize>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Shared {
    pub(crate) fn new(config: SchedulerConfig) -> Self {
        Shared {
            queues: QueueWrapper::new(config.spin_count),
            running: (0..config.thread_count)
                .map(|_| AtomicBool::new(true))
                .collect(),
            next_worker_id: Mutex::new(1),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
            config,
        }
    }

    pub(crate) fn register_worker(&self) -> usize {
        let mut next = self
            .next_worker_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next += 1;
        id
    }

    pub(crate) fn is_running(&self, id: usize) -> bool {
        self.running
            .get(id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub(crate) fn stop_worker(&self, id: usize) {
        if let Some(flag) = self.running.get(id) {
            flag.store(false, Ordering::Release);
        }
    }

    pub(crate) fn push_job(&self, to_main: bool, job: Job) {
        #[cfg(feature = "metrics")]
        Metrics::add(&self.metrics.jobs_pushed, 1);
        self.queues.push(to_main, job);
    }

    pub(crate) fn push_jobs(&self, to_main: bool, mut jobs: Vec<Job>) {
        #[cfg(feature = "metrics")]
        Metrics::add(&self.metrics.jobs_pushed, jobs.len());
        match jobs.len() {
            0 => {}
            1 => {
                if let Some(job) = jobs.pop() {
                    self.queues.push(to_main, job);
                }
            }
            _ => self.queues.push_bulk(to_main, jobs),
        }
    }

    fn push_kill_jobs(&self, count: usize) {
        self.push_jobs(false, (0..count).map(|_| worker::kill_job()).collect());
    }
}

/// Handle to a running scheduler.
///
/// Obtained from inside a job with [`Scheduler::current`]. Cloning is cheap.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// The scheduler the calling worker belongs to, or `None` outside one.
    pub fn current() -> Option<Scheduler> {
        worker::with_context(|context| Scheduler {
            shared: context.shared.clone(),
        })
    }

    /// Number of workers, worker 0 included.
    pub fn thread_count(&self) -> usize {
        self.shared.config.thread_count
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Enqueues runnables without waiting for them.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use nova::{Scheduler, bind};
    ///
    /// nova::start_sync(4, || {
    ///     let scheduler = Scheduler::current().unwrap();
    ///     scheduler.push(bind(|n: u32| println!("job {n}"), (1,)));
    /// })
    /// .unwrap();
    /// ```
    pub fn push<R: IntoJobs>(&self, runnables: R) {
        self.push_with(PushOptions::new(), runnables);
    }

    /// Enqueues runnables carrying the running job's token, so the `call`
    /// waiting on the running job also waits on these.
    pub fn push_dependent<R: IntoJobs>(&self, runnables: R) {
        self.push_with(PushOptions::new().dependent(), runnables);
    }

    pub fn push_with<R: IntoJobs>(&self, options: PushOptions, runnables: R) {
        let mut jobs = Vec::new();
        runnables.into_jobs(&mut jobs);
        if options.dependent {
            let token = fiber::current_token();
            if token.is_set() {
                for job in &mut jobs {
                    job.set_dependency_token(token.clone());
                }
            }
        }
        self.shared.push_jobs(options.to_main, jobs);
    }

    /// Pushes one kill job per worker. Each worker stops after finishing the
    /// job it is running.
    pub fn kill_all_workers(&self) {
        debug!(workers = self.thread_count(), "killing all workers");
        self.shared.push_kill_jobs(self.thread_count());
    }

    /// Snapshot of the scheduler's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Token whose release schedules the job that switches the fiber parked
    /// in `slot` back in.
    pub(crate) fn resume_token(&self, slot: Arc<ParkingSlot>, return_main: bool) -> DependencyToken {
        let shared = Arc::downgrade(&self.shared);
        DependencyToken::new(move || {
            // Gone during teardown; dropping the slot frees the fiber.
            if let Some(shared) = shared.upgrade() {
                shared.push_job(return_main, Job::new(move || worker::resume_parked(&slot)));
            }
        })
    }

    pub(crate) fn push_jobs(&self, to_main: bool, jobs: Vec<Job>) {
        self.shared.push_jobs(to_main, jobs);
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn record_parked_call(&self) {
        Metrics::add(&self.shared.metrics.calls_parked, 1);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Spawned workers of a starting scheduler. Dropping it without
/// [`stop`](Self::stop) (e.g. while worker 0 unwinds) still stops and joins
/// them.
struct WorkerSet {
    shared: Arc<Shared>,
    workers: Vec<WorkerThread>,
}

impl WorkerSet {
    /// Sends one kill job per spawned worker and joins them.
    fn stop(&mut self) -> Result<()> {
        if self.workers.is_empty() {
            return Ok(());
        }
        self.shared.push_kill_jobs(self.workers.len());

        let mut panicked = 0;
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => panicked += 1,
            }
        }

        if panicked > 0 {
            error!(panicked, "workers panicked");
            return Err(SchedulerError::WorkerPanicked(panicked));
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!(%err, "failed to stop workers");
        }
    }
}

/// Runs a scheduler with `main_job` queued on the main queue until worker 0
/// is killed, then stops and joins the other workers.
fn run_pool(shared: Arc<Shared>, main_job: Job) -> Result<()> {
    if worker::thread_id().is_some() {
        return Err(SchedulerError::InvalidConfig(
            "a scheduler is already running on this thread".into(),
        ));
    }
    let threads = shared.config.thread_count;
    debug!(threads, "starting scheduler");

    shared.push_job(true, main_job);

    let mut workers = WorkerSet {
        shared: shared.clone(),
        workers: Vec::with_capacity(threads - 1),
    };
    for _ in 1..threads {
        workers.workers.push(WorkerThread::spawn(shared.clone())?);
    }

    let main_result = worker::run_worker(0, shared);
    let stop_result = workers.stop();
    debug!("scheduler stopped");

    stop_result?;
    main_result
}

/// Starts a scheduler with `thread_count` workers, runs `f` on worker 0 and
/// tears the scheduler down once `f` returns.
///
/// The calling thread becomes worker 0 for the duration. Returns `f`'s
/// result, or [`SchedulerError::Interrupted`] if the workers were killed
/// before `f` finished.
///
/// # Example
///
/// ```no_run
/// let sum = nova::start_sync(4, || {
///     let mut parts = [0u64; 2];
///     let (left, right) = parts.split_at_mut(1);
///     nova::call((
///         nova::bind(|| left[0] = (0..500u64).sum(), ()),
///         nova::bind(|| right[0] = (500..1000u64).sum(), ()),
///     ))
///     .unwrap();
///     parts[0] + parts[1]
/// })
/// .unwrap();
/// assert_eq!(sum, 499_500);
/// ```
pub fn start_sync<F, R>(thread_count: usize, f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    start_sync_with(SchedulerConfig::new(thread_count), f)
}

/// [`start_sync`] with a full configuration.
pub fn start_sync_with<F, R>(config: SchedulerConfig, f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    config.validate()?;
    let shared = Arc::new(Shared::new(config));

    let output = Arc::new(Mutex::new(None));
    let output_slot = output.clone();
    let mut main_job = Job::new(move || {
        let value = f();
        *output_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    });
    // Worker 0 stops once `f` has returned, wherever it finished running.
    let weak = Arc::downgrade(&shared);
    main_job.set_dependency_token(DependencyToken::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.push_job(true, worker::kill_job());
        }
    }));

    run_pool(shared, main_job)?;

    let value = output
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    value.ok_or(SchedulerError::Interrupted)
}

/// Starts a scheduler with `thread_count` workers and pushes `f` to the main
/// queue. Returns once [`kill_all_workers`](crate::context::kill_all_workers)
/// has stopped every worker.
pub fn start_async<F>(thread_count: usize, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    start_async_with(SchedulerConfig::new(thread_count), f)
}

/// [`start_async`] with a full configuration.
pub fn start_async_with<F>(config: SchedulerConfig, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    config.validate()?;
    run_pool(Arc::new(Shared::new(config)), Job::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::default().thread_count >= 1);
        assert!(matches!(
            SchedulerConfig::new(0).validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert!(matches!(
            SchedulerConfig::new(2).with_stack_size(1024).validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_options_builders() {
        const PUSH: PushOptions = PushOptions::new().to_main().dependent();
        assert!(PUSH.to_main && PUSH.dependent);
        assert_eq!(PushOptions::new(), PushOptions::default());

        let call = CallOptions::new().return_main();
        assert!(call.return_main && !call.to_main);
    }

    #[test]
    fn test_worker_registration_starts_at_one() {
        let shared = Shared::new(SchedulerConfig::new(3));
        assert_eq!(shared.register_worker(), 1);
        assert_eq!(shared.register_worker(), 2);
        assert!(shared.is_running(2));
        shared.stop_worker(2);
        assert!(!shared.is_running(2));
        assert!(!shared.is_running(7));
    }

    #[test]
    fn test_no_scheduler_outside_workers() {
        assert!(Scheduler::current().is_none());
    }

    #[test]
    fn test_invalid_config_starts_nothing() {
        let result = start_sync(0, || 1);
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }
}
