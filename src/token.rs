//! Reference-counted completion tokens.
//!
//! A [`DependencyToken`] wraps a continuation [`Job`]. Every copy of the token
//! holds one reference; when the last copy is released the continuation runs,
//! exactly once, on whichever thread dropped it. Handing one copy to each of N
//! jobs is how "run this after those N jobs" is expressed.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::job::Job;

struct SharedToken {
    continuation: Job,
}

// SAFETY: the continuation is only touched in `drop`, which has exclusive
// access. Shared references never reach the job.
unsafe impl Sync for SharedToken {}

impl Drop for SharedToken {
    fn drop(&mut self) {
        mem::take(&mut self.continuation).run();
    }
}

/// Shared handle whose last release runs a continuation job.
///
/// Cloning adds a reference; dropping or calling [`release`](Self::release)
/// removes one. An empty token (the default) carries no continuation.
#[derive(Clone, Default)]
pub struct DependencyToken {
    shared: Option<Arc<SharedToken>>,
}

impl DependencyToken {
    /// Creates a token that runs `continuation` once every copy is released.
    pub fn new<F>(continuation: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_job(Job::new(continuation))
    }

    /// Creates a token around an already packaged continuation job.
    pub fn from_job(continuation: Job) -> Self {
        DependencyToken {
            shared: Some(Arc::new(SharedToken { continuation })),
        }
    }

    /// A token without continuation.
    pub const fn none() -> Self {
        DependencyToken { shared: None }
    }

    /// Drops this handle's reference now instead of at destruction.
    pub fn release(&mut self) {
        self.shared = None;
    }

    /// Whether this handle still holds a reference.
    pub fn is_set(&self) -> bool {
        self.shared.is_some()
    }

    /// Number of live copies sharing this token's continuation.
    pub fn holders(&self) -> usize {
        self.shared.as_ref().map_or(0, Arc::strong_count)
    }
}

impl fmt::Debug for DependencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyToken")
            .field("holders", &self.holders())
            .finish()
    }
}
