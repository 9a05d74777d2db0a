//! Job definitions and execution logic.
//!
//! A [`Job`] is a type-erased, move-only unit of work. The wrapped callable is
//! stored in one of three ways:
//!
//! - **Inline**: callables that fit [`INLINE_CAPACITY`] bytes (and 16-byte
//!   alignment) are written directly into the job, so packaging them does not
//!   allocate.
//! - **Heap**: larger callables are boxed.
//! - **Borrowed**: the job only points at a callable owned by someone else and
//!   never frees it. Used by `call` to run runnables that live on the waiting
//!   fiber's stack.
//!
//! Dispatch goes through a static table of function pointers chosen at
//! construction, so invoking a job is one indirect call.
//!
//! Each job also carries a [`DependencyToken`]. Workers take the token out
//! before running the job and release it right after the job returns.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr;

use crate::token::DependencyToken;

/// Bytes available for inline storage.
pub const INLINE_CAPACITY: usize = 48;

/// Maximum alignment a callable may require to be stored inline.
pub const INLINE_ALIGN: usize = 16;

/// Which storage mode a job is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// No callable; running the job does nothing.
    Empty,
    Inline,
    Heap,
    Borrowed,
}

#[repr(C, align(16))]
struct InlineBuffer(MaybeUninit<[u8; INLINE_CAPACITY]>);

impl InlineBuffer {
    const fn uninit() -> Self {
        InlineBuffer(MaybeUninit::uninit())
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr().cast()
    }
}

struct JobVTable {
    invoke: unsafe fn(*mut u8),
    drop: unsafe fn(*mut u8),
    mode: StorageMode,
}

unsafe fn no_op(_: *mut u8) {}

const EMPTY_VTABLE: JobVTable = JobVTable {
    invoke: no_op,
    drop: no_op,
    mode: StorageMode::Empty,
};

struct InlineVTable<F>(PhantomData<F>);

impl<F: FnOnce()> InlineVTable<F> {
    const VTABLE: JobVTable = JobVTable {
        invoke: Self::invoke,
        drop: Self::drop_payload,
        mode: StorageMode::Inline,
    };

    unsafe fn invoke(buffer: *mut u8) {
        // The job has already switched to the empty table, so the payload is
        // moved out exactly once here.
        let callable = unsafe { ptr::read(buffer.cast::<F>()) };
        callable();
    }

    unsafe fn drop_payload(buffer: *mut u8) {
        unsafe { ptr::drop_in_place(buffer.cast::<F>()) };
    }
}

struct HeapVTable<F>(PhantomData<F>);

impl<F: FnOnce()> HeapVTable<F> {
    const VTABLE: JobVTable = JobVTable {
        invoke: Self::invoke,
        drop: Self::drop_payload,
        mode: StorageMode::Heap,
    };

    unsafe fn invoke(buffer: *mut u8) {
        let callable = unsafe { Box::from_raw(ptr::read(buffer.cast::<*mut F>())) };
        callable();
    }

    unsafe fn drop_payload(buffer: *mut u8) {
        drop(unsafe { Box::from_raw(ptr::read(buffer.cast::<*mut F>())) });
    }
}

/// Pointer to a caller-owned callable plus the entry point that runs it.
#[derive(Clone, Copy)]
struct RawEntry {
    target: *const (),
    entry: unsafe fn(*const ()),
}

const BORROWED_VTABLE: JobVTable = JobVTable {
    invoke: invoke_borrowed,
    drop: no_op,
    mode: StorageMode::Borrowed,
};

unsafe fn invoke_borrowed(buffer: *mut u8) {
    let raw = unsafe { ptr::read(buffer.cast::<RawEntry>()) };
    unsafe { (raw.entry)(raw.target) };
}

unsafe fn call_raw<F: FnMut()>(target: *const ()) {
    let callable = unsafe { &mut *(target as *mut F) };
    callable();
}

/// A unit of work to be executed by the scheduler.
///
/// Jobs consist of a type-erased callable and a dependency token that is
/// released once the callable has run. Moving a job out with
/// [`std::mem::take`] leaves an empty job behind.
#[repr(C, align(64))]
pub struct Job {
    buffer: InlineBuffer,
    vtable: &'static JobVTable,
    token: DependencyToken,
}

// SAFETY: owning constructors require `F: Send`; borrowed construction is
// unsafe and its caller guarantees the target may be used from another thread.
unsafe impl Send for Job {}

impl Job {
    /// Creates a new job owning the given callable.
    ///
    /// Small callables are stored inline, larger ones are boxed.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut job = Job::empty();
        if mem::size_of::<F>() <= INLINE_CAPACITY && mem::align_of::<F>() <= INLINE_ALIGN {
            unsafe { ptr::write(job.buffer.as_mut_ptr().cast::<F>(), work) };
            job.vtable = &InlineVTable::<F>::VTABLE;
        } else {
            let raw = Box::into_raw(Box::new(work));
            unsafe { ptr::write(job.buffer.as_mut_ptr().cast::<*mut F>(), raw) };
            job.vtable = &HeapVTable::<F>::VTABLE;
        }
        job
    }

    /// Creates a job around a callable owned by the caller. The job never
    /// frees it.
    ///
    /// # Safety
    ///
    /// `callable` must stay valid, and must not be accessed by anyone else,
    /// until the job has run or been dropped. The job may run on any worker
    /// thread.
    pub unsafe fn from_raw<F>(callable: *mut F) -> Self
    where
        F: FnMut() + Send,
    {
        unsafe { Job::from_entry(callable as *const (), call_raw::<F>) }
    }

    /// Creates a borrowed job from a target pointer and the entry point that
    /// runs it.
    ///
    /// # Safety
    ///
    /// `entry(target)` must be sound to call once from any worker thread at
    /// any point before the job is dropped.
    pub(crate) unsafe fn from_entry(target: *const (), entry: unsafe fn(*const ())) -> Self {
        let mut job = Job::empty();
        unsafe {
            ptr::write(
                job.buffer.as_mut_ptr().cast::<RawEntry>(),
                RawEntry { target, entry },
            )
        };
        job.vtable = &BORROWED_VTABLE;
        job
    }

    /// A job that does nothing when run.
    pub const fn empty() -> Self {
        Job {
            buffer: InlineBuffer::uninit(),
            vtable: &EMPTY_VTABLE,
            token: DependencyToken::none(),
        }
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.vtable.mode
    }

    pub fn is_empty(&self) -> bool {
        self.vtable.mode == StorageMode::Empty
    }

    /// Attaches the token that is released once this job has run.
    pub fn set_dependency_token(&mut self, token: DependencyToken) {
        self.token = token;
    }

    pub fn dependency_token(&self) -> &DependencyToken {
        &self.token
    }

    /// Detaches the dependency token, leaving an empty one in its place.
    pub fn take_dependency_token(&mut self) -> DependencyToken {
        mem::take(&mut self.token)
    }

    /// Runs the callable. The payload is consumed (owning modes free it) and
    /// the job's own token copy is dropped on return.
    pub fn run(mut self) {
        let vtable = mem::replace(&mut self.vtable, &EMPTY_VTABLE);
        unsafe { (vtable.invoke)(self.buffer.as_mut_ptr()) };
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::empty()
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        let vtable = mem::replace(&mut self.vtable, &EMPTY_VTABLE);
        unsafe { (vtable.drop)(self.buffer.as_mut_ptr()) };
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("mode", &self.vtable.mode)
            .field("has_token", &self.token.is_set())
            .finish()
    }
}
