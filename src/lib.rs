//! # Nova - Cooperative Fiber-Based Job Scheduler
//!
//! A pool of worker threads pulls small units of work ("jobs") from shared
//! queues and runs them on stackful fibers. Any job can synchronously wait
//! for a set of other jobs with [`call`]: its fiber is parked and the worker
//! thread moves on to other work until the awaited jobs have finished.
//!
//! ## Architecture
//!
//! - **Jobs**: type-erased, move-only units of work with inline storage for
//!   small callables
//! - **Dependency tokens**: reference-counted handles whose last release runs
//!   a continuation job; "wait for N jobs" is N copies of one token
//! - **Queues**: a global queue drained by every worker and a main queue
//!   drained only by worker 0, with spin-then-sleep blocking pops
//! - **Workers**: OS threads whose root loop drives fibers running the job
//!   loop; worker 0 is the thread that started the scheduler
//! - **Batches**: [`BatchFunction`] splits an integer range into one
//!   contiguous section per worker
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let visited = nova::start_sync(4, || {
//!     let visited = AtomicUsize::new(0);
//!     nova::parallel_for(0, 1000, |_: u32| {
//!         visited.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//!     visited.into_inner()
//! })
//! .unwrap();
//! assert_eq!(visited, 1000);
//! ```

pub mod context;
pub mod error;
mod fiber;
mod fiber_pool;
pub mod function;
pub mod iter;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod runnable;
pub mod scheduler;
pub mod token;
mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning spawned worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

pub use context::{
    call, call_with, kill_all_workers, parallel_for, parallel_for_with, push, push_dependent,
    push_with, switch_to_main, thread_count, thread_id,
};
pub use error::{Result, SchedulerError};
pub use function::{BatchFunction, BatchIndex, Function, InvokeIndex, bind, bind_batch};
pub use iter::{ParallelSlice, ParallelSliceMut};
pub use job::Job;
pub use runnable::{IntoJobs, PackInPlace};
pub use scheduler::{
    CallOptions, PushOptions, Scheduler, SchedulerConfig, start_async, start_async_with,
    start_sync, start_sync_with,
};
pub use token::DependencyToken;
