//! Parallel slice helpers built on [`parallel_for`].
//!
//! Must be used from inside a job; the calling fiber waits until every
//! element has been visited.

use crate::context::parallel_for;
use crate::error::Result;

struct UnsafeSlice<T> {
    slice: *mut [T],
}

unsafe impl<T: Send> Send for UnsafeSlice<T> {}
unsafe impl<T: Send> Sync for UnsafeSlice<T> {}

impl<T> UnsafeSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            slice: slice as *mut [T],
        }
    }

    /// Safety: Caller must ensure disjoint access from other threads.
    unsafe fn get_mut<'a>(&self, index: usize) -> &'a mut T {
        unsafe { &mut (*self.slice)[index] }
    }
}

pub trait ParallelSlice<T> {
    fn par_iter(&self) -> ParallelIter<'_, T>;
}

pub trait ParallelSliceMut<T> {
    fn par_iter_mut(&mut self) -> ParallelIterMut<'_, T>;
}

impl<T: Sync> ParallelSlice<T> for [T] {
    fn par_iter(&self) -> ParallelIter<'_, T> {
        ParallelIter { slice: self }
    }
}

impl<T: Send> ParallelSliceMut<T> for [T] {
    fn par_iter_mut(&mut self) -> ParallelIterMut<'_, T> {
        ParallelIterMut { slice: self }
    }
}

pub struct ParallelIter<'a, T> {
    slice: &'a [T],
}

impl<T: Sync> ParallelIter<'_, T> {
    pub fn for_each<F>(self, op: F) -> Result<()>
    where
        F: Fn(&T) + Sync + Send,
    {
        let slice = self.slice;
        parallel_for(0, slice.len(), |i| op(&slice[i]))
    }
}

pub struct ParallelIterMut<'a, T> {
    slice: &'a mut [T],
}

impl<T: Send> ParallelIterMut<'_, T> {
    pub fn for_each<F>(self, op: F) -> Result<()>
    where
        F: Fn(&mut T) + Sync + Send,
    {
        let len = self.slice.len();
        let unsafe_slice = UnsafeSlice::new(self.slice);
        parallel_for(0, len, |i| {
            // Safety: parallel_for visits each index exactly once
            let item = unsafe { unsafe_slice.get_mut(i) };
            op(item);
        })
    }
}
