use tracing::{debug, warn};

use crate::error::Result;
use crate::fiber::{Fiber, FiberState};
use crate::worker;

/// A pool of idle fibers running the job loop.
/// Owned by a single worker's root loop.
pub(crate) struct FiberPool {
    pool: Vec<Box<Fiber>>,
    stack_size: usize,
    created: usize,
}

impl FiberPool {
    /// Creates a new fiber pool with pre-allocated fibers.
    pub(crate) fn new(initial_count: usize, stack_size: usize) -> Result<Self> {
        let mut pool = FiberPool {
            pool: Vec::with_capacity(initial_count),
            stack_size,
            created: 0,
        };
        pool.grow(initial_count)?;
        Ok(pool)
    }

    /// Grows the pool by the specified number of fibers.
    pub(crate) fn grow(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let fiber = self.create()?;
            self.pool.push(fiber);
        }
        Ok(())
    }

    fn create(&mut self) -> Result<Box<Fiber>> {
        let fiber = Fiber::new(self.stack_size, worker::job_loop)?;
        self.created += 1;
        #[cfg(feature = "metrics")]
        worker::with_context(|context| {
            crate::metrics::Metrics::add(&context.shared.metrics.fibers_created, 1)
        });
        debug!(stack_size = self.stack_size, total = self.created, "created fiber");
        Ok(fiber)
    }

    /// Retrieves an idle fiber, creating one if the pool is empty.
    pub(crate) fn get(&mut self) -> Result<Box<Fiber>> {
        match self.pool.pop() {
            Some(fiber) => Ok(fiber),
            None => self.create(),
        }
    }

    /// Returns an idle fiber to the pool for reuse.
    pub(crate) fn return_fiber(&mut self, fiber: Box<Fiber>) {
        self.pool.push(fiber);
    }

    /// Returns the current number of idle fibers.
    pub(crate) fn len(&self) -> usize {
        self.pool.len()
    }

    /// Total number of fibers this pool has allocated.
    #[cfg(test)]
    pub(crate) fn created(&self) -> usize {
        self.created
    }

    /// Resumes every idle fiber so its job loop observes the cleared running
    /// flag and returns, unwinding its stack normally.
    pub(crate) fn shutdown(mut self) {
        for mut fiber in self.pool.drain(..) {
            if let FiberState::Yielded(_) = fiber.resume() {
                warn!("idle fiber suspended again during shutdown");
            }
        }
    }
}
