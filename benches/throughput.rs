//! Throughput benchmark using criterion.
//!
//! Measures how fast the workers drain large numbers of tiny jobs, either
//! pushed individually or split by `parallel_for`.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nova::{SchedulerConfig, bind, call, parallel_for, push_dependent, start_sync_with};
use nova::job::Job;
use std::time::{Duration, Instant};

const JOB_COUNT: usize = 100_000;
const RANGE: u64 = 1_000_000;

fn timed<F>(config: SchedulerConfig, iters: u64, round: F) -> Duration
where
    F: Fn() + Send + 'static,
{
    start_sync_with(config, move || {
        let start = Instant::now();
        for _ in 0..iters {
            round();
        }
        start.elapsed()
    })
    .unwrap()
}

/// One call over a vector of tiny jobs.
fn bench_call_many_jobs(c: &mut Criterion) {
    let threads = num_cpus::get();
    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(JOB_COUNT as u64));
    group.sample_size(10);

    group.bench_function(BenchmarkId::new("call_100k_jobs", threads), |b| {
        b.iter_custom(|iters| {
            timed(SchedulerConfig::new(threads), iters, || {
                let jobs: Vec<_> = (0..JOB_COUNT)
                    .map(|i| bind(|i: usize| std::hint::black_box(i), (i,)))
                    .collect();
                call(jobs).unwrap();
            })
        })
    });

    // Jobs pushed one at a time from inside a job.
    group.bench_function(BenchmarkId::new("push_dependent_100k", threads), |b| {
        b.iter_custom(|iters| {
            timed(SchedulerConfig::new(threads), iters, || {
                call(bind(
                    || {
                        for i in 0..JOB_COUNT {
                            push_dependent(Job::new(move || {
                                std::hint::black_box(i);
                            }))
                            .unwrap();
                        }
                    },
                    (),
                ))
                .unwrap();
            })
        })
    });

    group.finish();
}

/// `parallel_for` over a large range at different thread counts.
fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput_scaling");
    group.throughput(Throughput::Elements(RANGE));
    group.sample_size(10);

    for threads in [1, 2, 4, 8, 16]
        .into_iter()
        .filter(|&t| t <= num_cpus::get())
    {
        let config = SchedulerConfig::new(threads).with_pinning(nova::PinningStrategy::AvoidSMT);
        group.bench_function(BenchmarkId::new("parallel_for_1m", threads), |b| {
            b.iter_custom(|iters| {
                timed(config.clone(), iters, || {
                    parallel_for(0, RANGE, |i| {
                        std::hint::black_box(i);
                    })
                    .unwrap();
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_call_many_jobs, bench_scaling);
criterion_main!(benches);
