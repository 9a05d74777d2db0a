//! Packing runnables into jobs.
//!
//! Anything the scheduler accepts is turned into jobs by one of two traits:
//!
//! - [`IntoJobs`] moves the runnable into owning jobs. Used by `push`, whose
//!   jobs outlive the pushing code, so runnables must be `'static`.
//! - [`PackInPlace`] creates borrowed jobs pointing at the runnable where it
//!   lives. Used by `call`, which keeps the runnable alive on the suspended
//!   fiber's stack until every job has run, so runnables may borrow locals.
//!
//! Both are implemented for [`Job`], [`Function`], [`BatchFunction`], tuples
//! of up to eight runnables, `Vec`s and arrays.

use std::mem;
use std::sync::Arc;

use crate::function::{BatchFunction, BatchIndex, Function, Invoke, InvokeRange};
use crate::job::Job;

/// Runnables that can be moved into owning jobs.
pub trait IntoJobs {
    fn into_jobs(self, jobs: &mut Vec<Job>);
}

/// Runnables that can be packed into jobs borrowing them in place.
pub trait PackInPlace {
    /// Number of jobs [`pack_in_place`](Self::pack_in_place) will produce.
    fn count(&self) -> usize;

    /// Appends the jobs for this runnable to `jobs`.
    ///
    /// # Safety
    ///
    /// `self` must not be moved, dropped or otherwise accessed until every
    /// produced job has run or been dropped. The jobs may run on any worker.
    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>);
}

impl IntoJobs for Job {
    fn into_jobs(self, jobs: &mut Vec<Job>) {
        jobs.push(self);
    }
}

impl PackInPlace for Job {
    fn count(&self) -> usize {
        1
    }

    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
        jobs.push(mem::take(self));
    }
}

impl<F, Args> IntoJobs for Function<F, Args>
where
    F: Invoke<Args> + Send + 'static,
    Args: Send + 'static,
{
    fn into_jobs(mut self, jobs: &mut Vec<Job>) {
        jobs.push(Job::new(move || self.run()));
    }
}

unsafe fn run_function<F, Args>(target: *const ())
where
    F: Invoke<Args>,
{
    let function = unsafe { &mut *(target as *mut Function<F, Args>) };
    function.run();
}

impl<F, Args> PackInPlace for Function<F, Args>
where
    F: Invoke<Args> + Send,
    Args: Send,
{
    fn count(&self) -> usize {
        1
    }

    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
        let target = self as *mut Self as *const ();
        jobs.push(unsafe { Job::from_entry(target, run_function::<F, Args>) });
    }
}

impl<F, I, Args> IntoJobs for BatchFunction<F, I, Args>
where
    F: InvokeRange<I, Args> + Send + Sync + 'static,
    I: BatchIndex,
    Args: Clone + Send + Sync + 'static,
{
    fn into_jobs(self, jobs: &mut Vec<Job>) {
        let sections = self.sections();
        // The last section job to finish frees the batch.
        let batch = Arc::new(self);
        jobs.extend((0..sections).map(|_| {
            let batch = batch.clone();
            Job::new(move || batch.run_section())
        }));
    }
}

unsafe fn run_batch_section<F, I, Args>(target: *const ())
where
    F: InvokeRange<I, Args>,
    I: BatchIndex,
    Args: Clone,
{
    let batch = unsafe { &*(target as *const BatchFunction<F, I, Args>) };
    batch.run_section();
}

impl<F, I, Args> PackInPlace for BatchFunction<F, I, Args>
where
    F: InvokeRange<I, Args> + Sync,
    I: BatchIndex,
    Args: Clone + Sync,
{
    fn count(&self) -> usize {
        self.sections()
    }

    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
        let target = self as *const Self as *const ();
        jobs.extend(
            (0..self.sections())
                .map(|_| unsafe { Job::from_entry(target, run_batch_section::<F, I, Args>) }),
        );
    }
}

impl IntoJobs for () {
    fn into_jobs(self, _jobs: &mut Vec<Job>) {}
}

impl PackInPlace for () {
    fn count(&self) -> usize {
        0
    }

    unsafe fn pack_in_place(&mut self, _jobs: &mut Vec<Job>) {}
}

impl<T: IntoJobs> IntoJobs for Vec<T> {
    fn into_jobs(self, jobs: &mut Vec<Job>) {
        for runnable in self {
            runnable.into_jobs(jobs);
        }
    }
}

impl<T: PackInPlace> PackInPlace for Vec<T> {
    fn count(&self) -> usize {
        self.iter().map(PackInPlace::count).sum()
    }

    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
        for runnable in self.iter_mut() {
            unsafe { runnable.pack_in_place(jobs) };
        }
    }
}

impl<T: IntoJobs, const N: usize> IntoJobs for [T; N] {
    fn into_jobs(self, jobs: &mut Vec<Job>) {
        for runnable in self {
            runnable.into_jobs(jobs);
        }
    }
}

impl<T: PackInPlace, const N: usize> PackInPlace for [T; N] {
    fn count(&self) -> usize {
        self.iter().map(PackInPlace::count).sum()
    }

    unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
        for runnable in self.iter_mut() {
            unsafe { runnable.pack_in_place(jobs) };
        }
    }
}

macro_rules! impl_runnable_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: IntoJobs),+> IntoJobs for ($($name,)+) {
            fn into_jobs(self, jobs: &mut Vec<Job>) {
                $(self.$idx.into_jobs(jobs);)+
            }
        }

        impl<$($name: PackInPlace),+> PackInPlace for ($($name,)+) {
            fn count(&self) -> usize {
                0 $(+ self.$idx.count())+
            }

            unsafe fn pack_in_place(&mut self, jobs: &mut Vec<Job>) {
                $(unsafe { self.$idx.pack_in_place(jobs) };)+
            }
        }
    };
}

impl_runnable_tuple!(A.0);
impl_runnable_tuple!(A.0, B.1);
impl_runnable_tuple!(A.0, B.1, C.2);
impl_runnable_tuple!(A.0, B.1, C.2, D.3);
impl_runnable_tuple!(A.0, B.1, C.2, D.3, E.4);
impl_runnable_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_runnable_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_runnable_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);
