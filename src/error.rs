//! Error types surfaced by the scheduler.

use thiserror::Error;

/// Failures reported by the scheduler API.
///
/// Job bodies never produce these: a panic inside a job is not caught and
/// ends the worker thread that ran it.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `call` was given a set containing no runnables.
    #[error("call requires at least one runnable")]
    EmptyCall,

    /// The calling thread is not a worker of a running scheduler, or the
    /// operation needs a fiber and the caller is not running on one.
    #[error("not running on a scheduler worker")]
    NotInWorker,

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// A fiber stack could not be allocated.
    #[error("failed to create fiber: {0}")]
    FiberCreation(#[source] std::io::Error),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// One or more worker threads terminated by a job panic.
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),

    /// The pool was stopped before the entry callable completed.
    #[error("scheduler stopped before the entry callable completed")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
