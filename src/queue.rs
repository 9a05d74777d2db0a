//! Job queues.
//!
//! [`ConcurrentQueue`] is the thin adaptor over a lock-free MPMC queue;
//! [`QueueWrapper`] pairs a global queue (drained by every worker) with a
//! main queue (drained only by worker 0) and adds blocking pops that spin
//! for a while before sleeping on a condition variable.

use std::sync::atomic::{AtomicUsize, Ordering, fence};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam::deque::{Injector, Steal};
use crossbeam::queue::SegQueue;

use crate::job::Job;

/// Number of failed pop attempts before a worker goes to sleep.
pub const DEFAULT_SPIN_COUNT: usize = 10_000;

/// Multi-producer multi-consumer queue used to hold jobs.
pub trait ConcurrentQueue<T>: Default + Send + Sync {
    /// Non-blocking pop.
    fn try_pop(&self) -> Option<T>;

    fn push(&self, item: T);

    fn push_bulk<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.push(item);
        }
    }

    fn is_empty(&self) -> bool;
}

/// Queue adaptor over crossbeam's `Injector`.
pub struct InjectorQueue<T> {
    inner: Injector<T>,
}

impl<T> Default for InjectorQueue<T> {
    fn default() -> Self {
        InjectorQueue {
            inner: Injector::new(),
        }
    }
}

impl<T: Send> ConcurrentQueue<T> for InjectorQueue<T> {
    fn try_pop(&self) -> Option<T> {
        loop {
            match self.inner.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn push(&self, item: T) {
        self.inner.push(item);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Queue adaptor over crossbeam's `SegQueue`.
pub struct SegQueueAdaptor<T> {
    inner: SegQueue<T>,
}

impl<T> Default for SegQueueAdaptor<T> {
    fn default() -> Self {
        SegQueueAdaptor {
            inner: SegQueue::new(),
        }
    }
}

impl<T: Send> ConcurrentQueue<T> for SegQueueAdaptor<T> {
    fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    fn push(&self, item: T) {
        self.inner.push(item);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Sleepers for one wait condition.
#[derive(Default)]
struct WaitCondition {
    condvar: Condvar,
    sleepers: AtomicUsize,
}

impl WaitCondition {
    fn wake_one(&self, lock: &Mutex<()>) {
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            drop(lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.condvar.notify_one();
        }
    }

    fn wake_all(&self, lock: &Mutex<()>) {
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            drop(lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.condvar.notify_all();
        }
    }
}

/// The global/main queue pair shared by all workers.
pub struct QueueWrapper<Q = InjectorQueue<Job>> {
    global: Q,
    main: Q,
    spin_count: usize,
    lock: Mutex<()>,
    global_wait: WaitCondition,
    main_wait: WaitCondition,
}

impl<Q: ConcurrentQueue<Job>> QueueWrapper<Q> {
    pub fn new(spin_count: usize) -> Self {
        QueueWrapper {
            global: Q::default(),
            main: Q::default(),
            spin_count,
            lock: Mutex::new(()),
            global_wait: WaitCondition::default(),
            main_wait: WaitCondition::default(),
        }
    }

    /// Pops a job from the global queue, blocking until one is available.
    pub fn pop(&self) -> Job {
        loop {
            for _ in 0..self.spin_count {
                if let Some(job) = self.global.try_pop() {
                    return job;
                }
                std::hint::spin_loop();
            }
            if let Some(job) = self.sleep_until(&self.global_wait, || self.global.try_pop()) {
                return job;
            }
        }
    }

    /// Pops a job for worker 0: the main queue first, then the global queue.
    pub fn pop_main(&self) -> Job {
        let try_both = || self.main.try_pop().or_else(|| self.global.try_pop());
        loop {
            for _ in 0..self.spin_count {
                if let Some(job) = try_both() {
                    return job;
                }
                std::hint::spin_loop();
            }
            if let Some(job) = self.sleep_until(&self.main_wait, try_both) {
                return job;
            }
        }
    }

    /// Registers as a sleeper, re-checks under the lock and waits once.
    fn sleep_until(
        &self,
        condition: &WaitCondition,
        try_pop: impl Fn() -> Option<Job>,
    ) -> Option<Job> {
        let guard = self.lock();
        condition.sleepers.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in `WaitCondition::wake_*`.
        fence(Ordering::SeqCst);
        let job = match try_pop() {
            Some(job) => Some(job),
            None => {
                let guard = condition
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
                drop(guard);
                None
            }
        };
        condition.sleepers.fetch_sub(1, Ordering::SeqCst);
        job
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues one job, waking one sleeper of the target queue. Global pushes
    /// also wake worker 0, which drains the global queue as well.
    pub fn push(&self, to_main: bool, job: Job) {
        if to_main {
            self.main.push(job);
            self.main_wait.wake_one(&self.lock);
        } else {
            self.global.push(job);
            self.global_wait.wake_one(&self.lock);
            self.main_wait.wake_one(&self.lock);
        }
    }

    /// Enqueues a batch of jobs. Global batches wake every global sleeper.
    pub fn push_bulk(&self, to_main: bool, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        if to_main {
            self.main.push_bulk(jobs);
            self.main_wait.wake_one(&self.lock);
        } else {
            self.global.push_bulk(jobs);
            self.global_wait.wake_all(&self.lock);
            self.main_wait.wake_one(&self.lock);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.main.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = counter.clone();
        Job::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn conservation<Q: ConcurrentQueue<usize> + 'static>() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(Q::default());
        let popped = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    let mut next = p * PER_PRODUCER;
                    let end = next + PER_PRODUCER;
                    while next < end {
                        let burst = rng.random_range(1..=16).min(end - next);
                        if burst == 1 {
                            queue.push(next);
                        } else {
                            queue.push_bulk(next..next + burst);
                        }
                        next += burst;
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let popped = popped.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        match queue.try_pop() {
                            Some(item) => local.push(item),
                            None if done.load(Ordering::SeqCst) == PRODUCERS => {
                                // Producers are finished; drain what is left.
                                while let Some(item) = queue.try_pop() {
                                    local.push(item);
                                }
                                break;
                            }
                            None => thread::yield_now(),
                        }
                    }
                    popped.lock().unwrap().extend(local);
                })
            })
            .collect();

        for handle in producers.into_iter().chain(consumers) {
            handle.join().unwrap();
        }

        let mut popped = popped.lock().unwrap().clone();
        popped.sort_unstable();
        let expected: Vec<_> = (0..PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(popped, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_injector_conservation() {
        conservation::<InjectorQueue<usize>>();
    }

    #[test]
    fn test_seg_queue_conservation() {
        conservation::<SegQueueAdaptor<usize>>();
    }

    #[test]
    fn test_pop_main_prefers_main_queue() {
        let queues: QueueWrapper = QueueWrapper::new(DEFAULT_SPIN_COUNT);
        let order = Arc::new(Mutex::new(Vec::new()));

        let global_order = order.clone();
        queues.push(false, Job::new(move || global_order.lock().unwrap().push("global")));
        let main_order = order.clone();
        queues.push(true, Job::new(move || main_order.lock().unwrap().push("main")));

        queues.pop_main().run();
        queues.pop_main().run();
        assert_eq!(*order.lock().unwrap(), vec!["main", "global"]);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let queues: Arc<QueueWrapper> = Arc::new(QueueWrapper::new(16));
        let counter = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let queues = queues.clone();
            thread::spawn(move || {
                for _ in 0..3 {
                    queues.pop().run();
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        queues.push(false, counting_job(&counter));
        thread::sleep(Duration::from_millis(20));
        queues.push_bulk(false, vec![counting_job(&counter), counting_job(&counter)]);

        consumer.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    fn wait_for_sleepers(condition: &WaitCondition, count: usize) {
        while condition.sleepers.load(Ordering::SeqCst) < count {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_bulk_push_wakes_every_sleeper() {
        const CONSUMERS: usize = 6;
        let queues: Arc<QueueWrapper> = Arc::new(QueueWrapper::new(8));
        let counter = Arc::new(AtomicUsize::new(0));

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queues = queues.clone();
                thread::spawn(move || queues.pop().run())
            })
            .collect();

        wait_for_sleepers(&queues.global_wait, CONSUMERS);
        queues.push_bulk(false, (0..CONSUMERS).map(|_| counting_job(&counter)).collect());

        for consumer in consumers {
            consumer.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), CONSUMERS);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_main_push_leaves_global_sleeper_asleep() {
        let queues: Arc<QueueWrapper> = Arc::new(QueueWrapper::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        let returned = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let queues = queues.clone();
            let returned = returned.clone();
            thread::spawn(move || {
                queues.pop().run();
                returned.fetch_add(1, Ordering::SeqCst);
            })
        };

        wait_for_sleepers(&queues.global_wait, 1);
        queues.push(true, counting_job(&counter));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(returned.load(Ordering::SeqCst), 0);
        assert_eq!(queues.main_wait.sleepers.load(Ordering::SeqCst), 0);
        assert!(!queues.is_empty());

        queues.push(false, counting_job(&counter));
        consumer.join().unwrap();
        assert_eq!(returned.load(Ordering::SeqCst), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The main job is still queued for worker 0.
        queues.pop_main().run();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_blocked_main_pop_wakes_on_either_queue() {
        let queues: Arc<QueueWrapper<SegQueueAdaptor<Job>>> = Arc::new(QueueWrapper::new(16));
        let counter = Arc::new(AtomicUsize::new(0));

        let main_consumer = {
            let queues = queues.clone();
            thread::spawn(move || {
                for _ in 0..2 {
                    queues.pop_main().run();
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        queues.push(true, counting_job(&counter));
        thread::sleep(Duration::from_millis(20));
        queues.push(false, counting_job(&counter));

        main_consumer.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
