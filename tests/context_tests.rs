//! Integration tests for the free functions usable from inside jobs.

use nova::job::Job;
use nova::{
    CallOptions, ParallelSlice, ParallelSliceMut, PushOptions, Scheduler, bind, call, call_with,
    parallel_for, parallel_for_with, push_dependent, push_with, start_sync, switch_to_main,
    thread_count, thread_id,
};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_thread_ids_stay_in_range() {
    let ids = start_sync(4, || {
        let ids = Mutex::new(Vec::new());
        let jobs: Vec<_> = (0..64)
            .map(|_| {
                let ids = &ids;
                bind(
                    move || {
                        std::thread::sleep(Duration::from_micros(50));
                        ids.lock().unwrap().push(thread_id().unwrap());
                    },
                    (),
                )
            })
            .collect();
        call(jobs).unwrap();
        assert_eq!(thread_count().unwrap(), 4);
        ids.into_inner().unwrap()
    })
    .unwrap();

    assert_eq!(ids.len(), 64);
    assert!(ids.iter().all(|&id| id < 4));
}

#[test]
fn test_entry_runs_on_worker_zero() {
    let id = start_sync(3, || thread_id().unwrap()).unwrap();
    assert_eq!(id, 0);
}

#[test]
fn test_main_queue_jobs_run_on_worker_zero() {
    let ids = start_sync(4, || {
        let ids = Mutex::new(Vec::new());
        let record = |_: usize| ids.lock().unwrap().push(thread_id().unwrap());
        let jobs: Vec<_> = (0..8).map(|i| bind(record, (i,))).collect();
        call_with(CallOptions::new().to_main(), jobs).unwrap();
        ids.into_inner().unwrap()
    })
    .unwrap();

    assert_eq!(ids, vec![0; 8]);
}

#[test]
fn test_pushed_main_job_runs_on_worker_zero() {
    let ids = start_sync(4, || {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let pusher = {
            let ids = ids.clone();
            move || {
                for _ in 0..4 {
                    let ids = ids.clone();
                    // Dependent, so the enclosing call waits for it.
                    push_with(
                        PushOptions::new().to_main().dependent(),
                        Job::new(move || ids.lock().unwrap().push(thread_id().unwrap())),
                    )
                    .unwrap();
                }
            }
        };
        call(bind(pusher, ())).unwrap();
        let ids = ids.lock().unwrap().clone();
        ids
    })
    .unwrap();

    assert_eq!(ids, vec![0; 4]);
}

#[test]
fn test_scheduler_handle_matches_free_functions() {
    let (threads, pushed) = start_sync(3, || {
        let scheduler = Scheduler::current().unwrap();
        let pushed = Arc::new(AtomicUsize::new(0));
        let counter = pushed.clone();
        let handle = scheduler.clone();
        call(bind(
            move || {
                handle.push_dependent(Job::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            },
            (),
        ))
        .unwrap();
        (scheduler.thread_count(), pushed.load(Ordering::SeqCst))
    })
    .unwrap();

    assert_eq!(threads, 3);
    assert_eq!(pushed, 1);
}

#[test]
fn test_switch_to_main_lands_on_worker_zero() {
    let landed = start_sync(4, || {
        let landed = Mutex::new(Vec::new());
        let hop = |_: usize| {
            switch_to_main().unwrap();
            landed.lock().unwrap().push(thread_id().unwrap());
        };
        let jobs: Vec<_> = (0..8).map(|i| bind(hop, (i,))).collect();
        call(jobs).unwrap();
        landed.into_inner().unwrap()
    })
    .unwrap();

    assert_eq!(landed, vec![0; 8]);
}

#[test]
fn test_return_main_resumes_caller_on_worker_zero() {
    let resumed_on = start_sync(4, || {
        let resumed_on = AtomicUsize::new(usize::MAX);
        call(bind(
            || {
                call_with(
                    CallOptions::new().return_main(),
                    bind(|| std::thread::sleep(Duration::from_millis(1)), ()),
                )
                .unwrap();
                resumed_on.store(thread_id().unwrap(), Ordering::SeqCst);
            },
            (),
        ))
        .unwrap();
        resumed_on.load(Ordering::SeqCst)
    })
    .unwrap();

    assert_eq!(resumed_on, 0);
}

#[test]
fn test_push_dependent_extends_call() {
    let finished = start_sync(4, || {
        let finished = Arc::new(AtomicUsize::new(0));
        let spawner = {
            let finished = finished.clone();
            move || {
                for _ in 0..5 {
                    let finished = finished.clone();
                    push_dependent(Job::new(move || {
                        std::thread::sleep(Duration::from_millis(5));
                        finished.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
                }
            }
        };
        call(bind(spawner, ())).unwrap();
        finished.load(Ordering::SeqCst)
    })
    .unwrap();

    assert_eq!(finished, 5);
}

#[test]
fn test_parallel_for_signed_range() {
    let sum = start_sync(4, || {
        let sum = std::sync::atomic::AtomicI64::new(0);
        parallel_for(-100i64, 100, |i| {
            sum.fetch_add(i, Ordering::Relaxed);
        })
        .unwrap();
        sum.into_inner()
    })
    .unwrap();

    assert_eq!(sum, -100);
}

#[test]
fn test_parallel_for_with_bound_arguments() {
    let (visits, weighted) = start_sync(4, || {
        let visits = Mutex::new(Vec::new());
        let weighted = std::sync::atomic::AtomicU64::new(0);
        parallel_for_with(
            0u64,
            200,
            |i: u64, scale: u64, visits: &Mutex<Vec<u64>>| {
                visits.lock().unwrap().push(i);
                weighted.fetch_add(i * scale, Ordering::Relaxed);
            },
            (3u64, &visits),
        )
        .unwrap();
        (visits.into_inner().unwrap(), weighted.into_inner())
    })
    .unwrap();

    let mut visits = visits;
    visits.sort_unstable();
    assert_eq!(visits, (0..200).collect::<Vec<_>>());
    assert_eq!(weighted, 3 * (0..200u64).sum::<u64>());
}

#[test]
fn test_parallel_for_empty_range_runs_nothing() {
    let hits = start_sync(2, || {
        let hits = AtomicUsize::new(0);
        parallel_for(5u32, 5, |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        hits.into_inner()
    })
    .unwrap();

    assert_eq!(hits, 0);
}

#[test]
fn test_par_iter_and_par_iter_mut() {
    let (doubled, total) = start_sync(4, || {
        let mut values: Vec<u64> = (0..500).collect();
        values.par_iter_mut().for_each(|v| *v *= 2).unwrap();

        let total = std::sync::atomic::AtomicU64::new(0);
        values
            .par_iter()
            .for_each(|v| {
                total.fetch_add(*v, Ordering::Relaxed);
            })
            .unwrap();
        (values, total.into_inner())
    })
    .unwrap();

    assert!(doubled.iter().enumerate().all(|(i, &v)| v == 2 * i as u64));
    assert_eq!(total, 2 * (0..500u64).sum::<u64>());
}
