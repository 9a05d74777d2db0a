use nova::{SchedulerConfig, bind, bind_batch, call, parallel_for, start_sync_with};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

fn fib(n: u64, out: &mut u64) {
    if n < 2 {
        *out = n;
        return;
    }
    let (mut a, mut b) = (0, 0);
    if let Err(e) = call((bind(fib, (n - 1, &mut a)), bind(fib, (n - 2, &mut b)))) {
        eprintln!("  call failed: {e}");
    }
    *out = a + b;
}

#[cfg(feature = "metrics")]
fn print_metrics() {
    if let Some(scheduler) = nova::Scheduler::current() {
        let metrics = scheduler.metrics();
        println!("Metrics:");
        println!("  jobs executed:  {}", metrics.jobs_executed);
        println!("  fibers created: {}", metrics.fibers_created);
        println!("  calls parked:   {}", metrics.calls_parked);
        println!("  jobs/second:    {:.2}\n", metrics.jobs_per_second());
    }
}

#[cfg(not(feature = "metrics"))]
fn print_metrics() {}

fn main() {
    println!("Nova - Cooperative Fiber-Based Job Scheduler\n");

    let num_threads = 4;
    let config = SchedulerConfig::new(num_threads).with_stack_size(128 * 1024);
    println!("Starting scheduler with {num_threads} worker threads\n");

    let result = start_sync_with(config, move || {
        // Example 1: waiting on a handful of jobs
        println!("Example 1: call with borrowed results");
        let mut halves = [0u64; 2];
        let (left, right) = halves.split_at_mut(1);
        let outcome = call((
            bind(|| left[0] = (0..50_000u64).sum(), ()),
            bind(|| right[0] = (50_000..100_000u64).sum(), ()),
        ));
        println!("  {outcome:?}, sum = {}\n", halves[0] + halves[1]);

        // Example 2: recursion through nested calls
        println!("Example 2: recursive fibonacci");
        let start = Instant::now();
        let mut out = 0;
        fib(16, &mut out);
        println!("  fib(16) = {out} in {:?}\n", start.elapsed());

        // Example 3: range splitting
        println!("Example 3: parallel_for over 1,000,000 indices");
        let visited = AtomicUsize::new(0);
        let start = Instant::now();
        let outcome = parallel_for(0u32, 1_000_000, |_| {
            visited.fetch_add(1, Ordering::Relaxed);
        });
        let duration = start.elapsed();
        println!(
            "  {outcome:?}, visited {} indices in {duration:?}",
            visited.load(Ordering::Relaxed)
        );
        println!(
            "  Throughput: {:.2} indices/second\n",
            1_000_000.0 / duration.as_secs_f64()
        );

        // Example 4: a batch callable receives whole sections
        println!("Example 4: batch sections");
        let total = AtomicU64::new(0);
        let batch = bind_batch(
            |lo: u64, hi: u64, scale: u64| {
                total.fetch_add((lo..hi).sum::<u64>() * scale, Ordering::Relaxed);
            },
            0,
            1_000,
            (2,),
        );
        println!("  split into {} sections", batch.sections());
        let outcome = call(batch);
        println!("  {outcome:?}, total = {}\n", total.load(Ordering::Relaxed));

        print_metrics();
    });

    match result {
        Ok(()) => println!("Done!"),
        Err(e) => eprintln!("Scheduler error: {e}"),
    }
}
