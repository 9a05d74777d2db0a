//! Fiber management and execution context.
//!
//! A [`Fiber`] is a stackful coroutine that runs the worker job loop. Fibers
//! are always driven from a worker's root loop on the thread's native stack:
//! the root resumes a fiber, and the fiber hands control back by suspending
//! with a [`Suspend`] request telling the root what to do next.
//!
//! Fibers migrate between threads. A fiber parked by `call` on one worker may
//! be switched back in by whichever worker runs its resume job, so nothing
//! thread-local may be cached on a fiber stack across a suspension.

use std::cell::{Cell, RefCell};
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::thread;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use crossbeam::atomic::AtomicCell;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::token::DependencyToken;

/// Request a fiber passes to the root loop when it suspends.
pub(crate) enum Suspend {
    /// Park the suspended fiber in `slot`, then drop `token`. The token's
    /// continuation schedules the job that resumes the fiber, so the fiber is
    /// always stored before anyone can look for it.
    Park {
        slot: Arc<ParkingSlot>,
        token: DependencyToken,
    },
    /// Run `target` next. The suspended fiber becomes idle and is pooled.
    SwitchTo(Box<Fiber>),
}

/// What the root loop gets back from [`Fiber::resume`].
pub(crate) enum FiberState {
    Yielded(Suspend),
    /// The job loop returned: the worker was killed.
    Complete,
}

/// Holds a fiber suspended inside `call` until its resume job takes it.
#[derive(Default)]
pub(crate) struct ParkingSlot {
    fiber: AtomicCell<Option<Box<Fiber>>>,
}

impl ParkingSlot {
    pub(crate) fn park(&self, fiber: Box<Fiber>) {
        self.fiber.store(Some(fiber));
    }

    pub(crate) fn take(&self) -> Option<Box<Fiber>> {
        self.fiber.take()
    }
}

/// State owned by a fiber and reachable from code running on it.
pub(crate) struct FiberLocals {
    yielder: Cell<*const Yielder<(), Suspend>>,
    /// Token of the job this fiber is currently running.
    token: RefCell<DependencyToken>,
}

impl FiberLocals {
    /// Runs `job` with its token installed as the fiber's current token, and
    /// releases the token as soon as the job returns (or unwinds).
    pub(crate) fn run_job(&self, mut job: Job) {
        let token = job.take_dependency_token();
        let _scope = JobScope::enter(self, token);
        job.run();
    }

    fn current_token(&self) -> DependencyToken {
        self.token.borrow().clone()
    }
}

struct JobScope<'a> {
    locals: &'a FiberLocals,
}

impl<'a> JobScope<'a> {
    fn enter(locals: &'a FiberLocals, token: DependencyToken) -> Self {
        *locals.token.borrow_mut() = token;
        JobScope { locals }
    }
}

impl Drop for JobScope<'_> {
    fn drop(&mut self) {
        // The continuation may run here; the borrow must be gone by then.
        let mut token = self.locals.token.take();
        token.release();
    }
}

thread_local! {
    static CURRENT_FIBER: Cell<*const FiberLocals> = const { Cell::new(ptr::null()) };
}

/// Marks a fiber as current on this thread for the duration of a resume.
struct CurrentGuard {
    previous: *const FiberLocals,
}

impl CurrentGuard {
    fn enter(locals: &FiberLocals) -> Self {
        CurrentGuard {
            previous: CURRENT_FIBER.replace(locals),
        }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT_FIBER.set(self.previous);
    }
}

#[inline(never)]
fn current_locals() -> *const FiberLocals {
    CURRENT_FIBER.get()
}

/// A lightweight stackful execution context.
///
/// Uses `corosensei` for context switching.
pub(crate) struct Fiber {
    // Declared first: the coroutine must be gone before its locals are freed.
    coroutine: Option<Coroutine<(), Suspend, (), DefaultStack>>,
    locals: Box<FiberLocals>,
}

// SAFETY: fibers only move between threads while suspended, and the code
// running on them re-reads thread-local state after every suspension.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Allocates a fiber whose body is `entry`. The body starts on the first
    /// [`resume`](Self::resume).
    pub(crate) fn new<F>(stack_size: usize, entry: F) -> Result<Box<Fiber>>
    where
        F: FnOnce(&FiberLocals) + 'static,
    {
        let stack = DefaultStack::new(stack_size).map_err(SchedulerError::FiberCreation)?;
        let locals = Box::new(FiberLocals {
            yielder: Cell::new(ptr::null()),
            token: RefCell::new(DependencyToken::none()),
        });
        let locals_ptr: *const FiberLocals = &*locals;

        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            // SAFETY: the locals box outlives the coroutine (see field order).
            let locals = unsafe { &*locals_ptr };
            locals.yielder.set(yielder);
            entry(locals);
        });

        Ok(Box::new(Fiber {
            coroutine: Some(coroutine),
            locals,
        }))
    }

    /// Runs the fiber until it suspends or its body returns. Panics raised on
    /// the fiber propagate out of this call.
    pub(crate) fn resume(&mut self) -> FiberState {
        let Some(coroutine) = self.coroutine.as_mut() else {
            return FiberState::Complete;
        };
        let _current = CurrentGuard::enter(&self.locals);
        match coroutine.resume(()) {
            CoroutineResult::Yield(request) => FiberState::Yielded(request),
            CoroutineResult::Return(()) => FiberState::Complete,
        }
    }

    /// Whether the fiber is suspended part-way through its body.
    #[cfg(test)]
    pub(crate) fn is_suspended(&self) -> bool {
        self.coroutine
            .as_ref()
            .is_some_and(|c| c.started() && !c.done())
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        let Some(coroutine) = self.coroutine.take() else {
            return;
        };
        if coroutine.started() && !coroutine.done() {
            if thread::panicking() {
                // Unwinding the fiber now would be a panic during a panic.
                warn!("leaking suspended fiber during panic");
                mem::forget(coroutine);
                return;
            }
            warn!("dropping suspended fiber; unwinding its stack");
        }
        drop(coroutine);
    }
}

/// Suspends the current fiber, handing `request` to the root loop.
///
/// Returns once the fiber has been resumed, possibly on another thread.
pub(crate) fn suspend(request: Suspend) -> Result<()> {
    let locals = current_locals();
    if locals.is_null() {
        return Err(SchedulerError::NotInWorker);
    }
    // SAFETY: CURRENT_FIBER only points at the locals of the fiber being
    // resumed on this thread, which is the one running this code.
    let yielder = unsafe { (*locals).yielder.get() };
    if yielder.is_null() {
        return Err(SchedulerError::NotInWorker);
    }
    unsafe { (*yielder).suspend(request) };
    Ok(())
}

/// Whether the calling code runs on a fiber.
pub(crate) fn in_fiber() -> bool {
    !current_locals().is_null()
}

/// A copy of the token of the job running on the current fiber, or an empty
/// token outside a fiber.
pub(crate) fn current_token() -> DependencyToken {
    let locals = current_locals();
    if locals.is_null() {
        return DependencyToken::none();
    }
    unsafe { (*locals).current_token() }
}
