//! Scheduler access from inside jobs.
//!
//! These free functions act on the scheduler the calling worker belongs to.
//! Used from any other thread they fail with [`SchedulerError::NotInWorker`].

use std::sync::Arc;

use tracing::trace;

use crate::error::{Result, SchedulerError};
use crate::fiber::{self, ParkingSlot, Suspend};
use crate::function::{BatchIndex, InvokeIndex, bind_batch, range_len};
use crate::runnable::{IntoJobs, PackInPlace};
use crate::scheduler::{CallOptions, PushOptions, Scheduler};
use crate::worker;

fn current() -> Result<Scheduler> {
    Scheduler::current().ok_or(SchedulerError::NotInWorker)
}

/// Enqueues runnables on the global queue without waiting for them.
pub fn push<R: IntoJobs>(runnables: R) -> Result<()> {
    push_with(PushOptions::new(), runnables)
}

/// Enqueues runnables that the `call` waiting on the running job also waits
/// on. Outside a running job this is a plain [`push`].
pub fn push_dependent<R: IntoJobs>(runnables: R) -> Result<()> {
    push_with(PushOptions::new().dependent(), runnables)
}

pub fn push_with<R: IntoJobs>(options: PushOptions, runnables: R) -> Result<()> {
    current()?.push_with(options, runnables);
    Ok(())
}

/// Runs runnables and suspends the calling fiber until all of them, and
/// everything they push as dependent, have finished.
///
/// The worker thread keeps running other jobs meanwhile. The caller may be
/// resumed on a different worker. Runnables may borrow from the caller.
///
/// # Errors
///
/// [`SchedulerError::EmptyCall`] if `runnables` packs into no jobs, and
/// [`SchedulerError::NotInWorker`] outside a worker fiber.
///
/// # Example
///
/// ```no_run
/// use std::sync::Mutex;
/// use nova::bind;
///
/// nova::start_sync(4, || {
///     let log = Mutex::new(Vec::new());
///     let record = |id: u32| log.lock().unwrap().push(id);
///     nova::call((bind(record, (1,)), bind(record, (2,)))).unwrap();
///     assert_eq!(log.lock().unwrap().len(), 2);
/// })
/// .unwrap();
/// ```
pub fn call<R: PackInPlace>(runnables: R) -> Result<()> {
    call_with(CallOptions::new(), runnables)
}

pub fn call_with<R: PackInPlace>(options: CallOptions, mut runnables: R) -> Result<()> {
    if runnables.count() == 0 {
        return Err(SchedulerError::EmptyCall);
    }
    call_packed(options, &mut runnables)
}

fn call_packed<R: PackInPlace>(options: CallOptions, runnables: &mut R) -> Result<()> {
    if !fiber::in_fiber() {
        return Err(SchedulerError::NotInWorker);
    }
    let slot = Arc::new(ParkingSlot::default());
    let token = {
        // Dropped before parking: a parked stack must not own the scheduler.
        let scheduler = current()?;
        let token = scheduler.resume_token(slot.clone(), options.return_main);
        let mut jobs = Vec::with_capacity(runnables.count());
        // SAFETY: `runnables` stays put until this fiber is resumed, which
        // happens only once every job below has run and released its token.
        unsafe { runnables.pack_in_place(&mut jobs) };
        for job in &mut jobs {
            job.set_dependency_token(token.clone());
        }
        scheduler.push_jobs(options.to_main, jobs);
        #[cfg(feature = "metrics")]
        scheduler.record_parked_call();
        token
    };
    trace!(return_main = options.return_main, "parking caller");
    fiber::suspend(Suspend::Park { slot, token })
}

/// Calls `f(i)` for every `i` in `[start, end)`, split into one section per
/// worker, and waits for all of them.
pub fn parallel_for<I, F>(start: I, end: I, f: F) -> Result<()>
where
    I: BatchIndex,
    F: Fn(I) + Sync + Send,
{
    parallel_for_with(start, end, f, ())
}

/// [`parallel_for`] with bound arguments: calls `f(i, args...)` for every `i`
/// in `[start, end)`. Each call gets its own clone of `args`.
///
/// # Example
///
/// ```no_run
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// nova::start_sync(4, || {
///     let total = AtomicU64::new(0);
///     nova::parallel_for_with(
///         0u64,
///         100,
///         |i: u64, scale: u64, total: &AtomicU64| {
///             total.fetch_add(i * scale, Ordering::Relaxed);
///         },
///         (3, &total),
///     )
///     .unwrap();
///     assert_eq!(total.into_inner(), 3 * 4950);
/// })
/// .unwrap();
/// ```
pub fn parallel_for_with<I, F, Args>(start: I, end: I, f: F, args: Args) -> Result<()>
where
    I: BatchIndex,
    F: InvokeIndex<I, Args> + Sync + Send,
    Args: Clone + Sync + Send,
{
    if !fiber::in_fiber() || worker::thread_id().is_none() {
        return Err(SchedulerError::NotInWorker);
    }
    if range_len(start, end) == 0 {
        return Ok(());
    }
    let f = &f;
    let batch = bind_batch(
        move |lo: I, hi: I, args: Args| {
            for i in lo.to_i128()..hi.to_i128() {
                f.invoke_index(I::from_i128(i), args.clone());
            }
        },
        start,
        end,
        (args,),
    );
    call(batch)
}

/// Moves the calling job to worker 0.
pub fn switch_to_main() -> Result<()> {
    call_packed(CallOptions::new().return_main(), &mut ())
}

/// Pushes one kill job per worker; see [`Scheduler::kill_all_workers`].
pub fn kill_all_workers() -> Result<()> {
    current()?.kill_all_workers();
    Ok(())
}

/// Index of the calling worker; 0 is the thread that started the scheduler.
pub fn thread_id() -> Result<usize> {
    worker::thread_id().ok_or(SchedulerError::NotInWorker)
}

/// Number of workers of the calling worker's scheduler.
pub fn thread_count() -> Result<usize> {
    worker::configured_thread_count().ok_or(SchedulerError::NotInWorker)
}
