//! Callables bound to their arguments.
//!
//! [`Function`] pairs a callable with a tuple of arguments and runs once.
//! [`BatchFunction`] binds a callable taking a `[start, end)` range (plus any
//! further arguments) and splits that range into contiguous sections, one per
//! worker, each run as its own job.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use crate::worker;

/// A callable that can be invoked once with an argument tuple.
pub trait Invoke<Args> {
    type Output;

    fn invoke(self, args: Args) -> Self::Output;
}

/// A callable taking a single index followed by an argument tuple.
pub trait InvokeIndex<I, Args> {
    fn invoke_index(&self, index: I, args: Args);
}

/// A callable taking a sub-range followed by an argument tuple.
pub trait InvokeRange<I, Args> {
    fn invoke_range(&self, start: I, end: I, args: Args);
}

macro_rules! impl_invoke {
    ($($arg:ident),*) => {
        impl<Func, Out, $($arg,)*> Invoke<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) -> Out,
        {
            type Output = Out;

            #[allow(non_snake_case)]
            fn invoke(self, ($($arg,)*): ($($arg,)*)) -> Out {
                self($($arg),*)
            }
        }

        impl<Func, I, $($arg,)*> InvokeIndex<I, ($($arg,)*)> for Func
        where
            Func: Fn(I, $($arg),*),
        {
            #[allow(non_snake_case)]
            fn invoke_index(&self, index: I, ($($arg,)*): ($($arg,)*)) {
                self(index, $($arg),*)
            }
        }

        impl<Func, I, $($arg,)*> InvokeRange<I, ($($arg,)*)> for Func
        where
            Func: Fn(I, I, $($arg),*),
        {
            #[allow(non_snake_case)]
            fn invoke_range(&self, start: I, end: I, ($($arg,)*): ($($arg,)*)) {
                self(start, end, $($arg),*)
            }
        }
    };
}

impl_invoke!();
impl_invoke!(A0);
impl_invoke!(A0, A1);
impl_invoke!(A0, A1, A2);
impl_invoke!(A0, A1, A2, A3);
impl_invoke!(A0, A1, A2, A3, A4);
impl_invoke!(A0, A1, A2, A3, A4, A5);

/// A callable bound to its arguments. Runs at most once.
pub struct Function<F, Args> {
    inner: Option<(F, Args)>,
}

/// Binds `args` to `f`.
pub fn bind<F, Args>(f: F, args: Args) -> Function<F, Args>
where
    F: Invoke<Args>,
{
    Function {
        inner: Some((f, args)),
    }
}

impl<F> Function<F, ()>
where
    F: Invoke<()>,
{
    /// Wraps a callable that takes no arguments.
    pub fn new(f: F) -> Self {
        bind(f, ())
    }
}

impl<F, Args> Function<F, Args>
where
    F: Invoke<Args>,
{
    /// Invokes the callable. Later calls do nothing.
    pub fn run(&mut self) {
        if let Some((f, args)) = self.inner.take() {
            f.invoke(args);
        }
    }

    pub fn has_run(&self) -> bool {
        self.inner.is_none()
    }
}

impl<F, Args> fmt::Debug for Function<F, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("has_run", &self.inner.is_none())
            .finish()
    }
}

/// Integer types usable as batch range bounds.
pub trait BatchIndex: Copy + Send + Sync + 'static {
    fn to_i128(self) -> i128;

    fn from_i128(value: i128) -> Self;
}

macro_rules! impl_batch_index {
    ($($t:ty),*) => {
        $(
            impl BatchIndex for $t {
                #[inline]
                fn to_i128(self) -> i128 {
                    self as i128
                }

                #[inline]
                fn from_i128(value: i128) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_batch_index!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// Number of indices in `[start, end)`; zero for reversed ranges.
pub fn range_len<I: BatchIndex>(start: I, end: I) -> u128 {
    (end.to_i128() - start.to_i128()).max(0) as u128
}

/// Bounds of `section` (1-based) when `[start, end)` is split into
/// `sections` parts.
///
/// Both bounds come from the same floor formula evaluated at consecutive
/// section numbers, so consecutive sections share a boundary and the whole
/// range is tiled exactly.
pub fn section_bounds<I: BatchIndex>(start: I, end: I, section: usize, sections: usize) -> (I, I) {
    debug_assert!(section >= 1 && section <= sections);
    let base = start.to_i128();
    let len = range_len(start, end);
    let lo = len * (section as u128 - 1) / sections as u128;
    let hi = len * section as u128 / sections as u128;
    (
        I::from_i128(base + lo as i128),
        I::from_i128(base + hi as i128),
    )
}

/// A range-splitting callable. Each invocation of
/// [`run_section`](Self::run_section) claims the next section.
pub struct BatchFunction<F, I, Args> {
    func: F,
    args: Args,
    start: I,
    end: I,
    sections: usize,
    next_section: CachePadded<AtomicUsize>,
}

/// Binds `f` over `[start, end)`, split across the current scheduler's
/// workers. Outside a worker the batch has a single section.
pub fn bind_batch<F, I, Args>(f: F, start: I, end: I, args: Args) -> BatchFunction<F, I, Args>
where
    F: InvokeRange<I, Args>,
    I: BatchIndex,
    Args: Clone,
{
    let workers = worker::configured_thread_count().unwrap_or(1);
    BatchFunction::with_worker_count(f, start, end, args, workers)
}

impl<F, I, Args> BatchFunction<F, I, Args>
where
    F: InvokeRange<I, Args>,
    I: BatchIndex,
    Args: Clone,
{
    /// Binds `f` over `[start, end)` split for `workers` workers.
    pub fn with_worker_count(f: F, start: I, end: I, args: Args, workers: usize) -> Self {
        let len = range_len(start, end);
        let sections = len.min(workers.max(1) as u128) as usize;
        BatchFunction {
            func: f,
            args,
            start,
            end,
            sections,
            next_section: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Number of jobs this batch packs into.
    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn range(&self) -> (I, I) {
        (self.start, self.end)
    }

    /// Claims the next section and runs the callable over it. Does nothing
    /// once every section has been claimed.
    pub fn run_section(&self) {
        let section = self.next_section.fetch_add(1, Ordering::AcqRel) + 1;
        if section > self.sections {
            return;
        }
        let (lo, hi) = section_bounds(self.start, self.end, section, self.sections);
        self.func.invoke_range(lo, hi, self.args.clone());
    }
}

impl<F, I: fmt::Debug, Args> fmt::Debug for BatchFunction<F, I, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFunction")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("sections", &self.sections)
            .field("claimed", &self.next_section.load(Ordering::Relaxed))
            .finish()
    }
}
