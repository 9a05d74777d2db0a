//! Worker thread implementation.
//!
//! Every worker runs a root loop on its native stack that resumes fibers, and
//! each fiber runs the job loop: pop a job, run it, release its token, repeat
//! while the worker's running flag is set. Worker 0 is the thread that started
//! the scheduler; it drains the main queue before the global one.
//!
//! Worker identity lives in a thread-local. Code on a fiber must look it up
//! again after every suspension since the fiber may have moved threads.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

use crate::PinningStrategy;
use crate::error::{Result, SchedulerError};
use crate::fiber::{self, FiberLocals, FiberState, ParkingSlot, Suspend};
use crate::fiber_pool::FiberPool;
use crate::job::Job;
use crate::scheduler::Shared;

pub(crate) struct WorkerContext {
    pub(crate) id: usize,
    pub(crate) shared: Arc<Shared>,
}

thread_local! {
    static CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Installs the worker context for the lifetime of the root loop.
struct ContextGuard {
    id: usize,
}

impl ContextGuard {
    fn enter(id: usize, shared: Arc<Shared>) -> Self {
        CONTEXT.with_borrow_mut(|context| *context = Some(WorkerContext { id, shared }));
        ContextGuard { id }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.id, "worker unwinding from a job panic");
        }
        let context = CONTEXT.with_borrow_mut(Option::take);
        drop(context);
    }
}

/// Runs `f` against the calling thread's worker context, if any.
#[inline(never)]
pub(crate) fn with_context<R>(f: impl FnOnce(&WorkerContext) -> R) -> Option<R> {
    CONTEXT.with_borrow(|context| context.as_ref().map(f))
}

/// Index of the calling worker; 0 is the main worker.
pub(crate) fn thread_id() -> Option<usize> {
    with_context(|context| context.id)
}

/// Worker count of the scheduler the calling thread belongs to.
pub(crate) fn configured_thread_count() -> Option<usize> {
    with_context(|context| context.shared.config.thread_count)
}

/// Clears the calling worker's running flag. Its job loop stops once the
/// current job returns.
pub(crate) fn kill_worker() {
    let killed = with_context(|context| {
        context.shared.stop_worker(context.id);
        context.id
    });
    match killed {
        Some(id) => debug!(worker = id, "worker killed"),
        None => warn!("kill job ran outside a worker"),
    }
}

/// The job a kill request is delivered as.
pub(crate) fn kill_job() -> Job {
    Job::new(kill_worker)
}

#[inline(never)]
fn next_job() -> Option<Job> {
    with_context(|context| {
        if !context.shared.is_running(context.id) {
            return None;
        }
        let queues = &context.shared.queues;
        let job = if context.id == 0 {
            queues.pop_main()
        } else {
            queues.pop()
        };
        #[cfg(feature = "metrics")]
        crate::metrics::Metrics::add(&context.shared.metrics.jobs_executed, 1);
        Some(job)
    })
    .flatten()
}

/// Body of every worker fiber.
pub(crate) fn job_loop(locals: &FiberLocals) {
    while let Some(job) = next_job() {
        locals.run_job(job);
    }
}

/// Body of the job that resumes a fiber parked by `call`.
pub(crate) fn resume_parked(slot: &ParkingSlot) {
    let Some(parked) = slot.take() else {
        warn!("resume job found no parked fiber");
        return;
    };
    #[cfg(feature = "metrics")]
    with_context(|context| crate::metrics::Metrics::add(&context.shared.metrics.fibers_resumed, 1));
    trace!("switching to parked fiber");
    if let Err(err) = fiber::suspend(Suspend::SwitchTo(parked)) {
        error!(%err, "resume job ran outside a fiber");
    }
}

/// Root loop of a worker: drives fibers until the job loop observes the
/// worker's running flag cleared.
pub(crate) fn run_worker(id: usize, shared: Arc<Shared>) -> Result<()> {
    let _context = ContextGuard::enter(id, shared.clone());
    debug!(worker = id, "worker started");

    let config = &shared.config;
    let mut pool = FiberPool::new(config.initial_pool_size, config.stack_size)?;
    let mut current = pool.get()?;

    loop {
        match current.resume() {
            FiberState::Yielded(Suspend::Park { slot, token }) => {
                trace!(worker = id, "fiber parked");
                slot.park(current);
                // May schedule the resume job; the fiber is already stored.
                drop(token);
                current = pool.get()?;
            }
            FiberState::Yielded(Suspend::SwitchTo(target)) => {
                trace!(worker = id, "fiber resumed");
                pool.return_fiber(current);
                current = target;
            }
            FiberState::Complete => break,
        }
    }

    let idle = pool.len();
    pool.shutdown();
    debug!(worker = id, idle_fibers = idle, "worker stopped");
    Ok(())
}

/// Picks the core a spawned worker is pinned to.
fn core_for(strategy: PinningStrategy, id: usize) -> Option<core_affinity::CoreId> {
    let cores = core_affinity::get_core_ids()?;
    if cores.is_empty() {
        return None;
    }
    let index = match strategy {
        PinningStrategy::None => return None,
        PinningStrategy::Linear => id % cores.len(),
        PinningStrategy::AvoidSMT => (id * 2) % cores.len(),
    };
    cores.get(index).copied()
}

/// A spawned worker thread (workers 1 and up).
pub(crate) struct WorkerThread {
    handle: JoinHandle<Result<()>>,
}

impl WorkerThread {
    /// Spawns a worker. Its id is assigned under the registration lock once
    /// the thread is running.
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("nova-worker".into())
            .spawn(move || {
                let id = shared.register_worker();
                if let Some(core) = core_for(shared.config.pinning, id) {
                    if !core_affinity::set_for_current(core) {
                        warn!(worker = id, "failed to pin worker to core");
                    }
                }
                let result = run_worker(id, shared);
                if let Err(err) = &result {
                    error!(worker = id, %err, "worker failed");
                }
                result
            })
            .map_err(SchedulerError::Spawn)?;
        Ok(WorkerThread { handle })
    }

    /// Waits for the worker thread to finish. `Err` means the thread died
    /// from a panic.
    pub(crate) fn join(self) -> thread::Result<Result<()>> {
        self.handle.join()
    }
}
