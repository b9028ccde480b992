use lifecycle_sync::{make_lifecycle, use_object, Lifecycle, ManagerConfig, Pool, StackTraceManager};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const ITERATIONS: u32 = 1_000_000;

fn report(label: &str, iterations: u32, elapsed: std::time::Duration) {
    println!("{label}: {elapsed:?} total, {:?} per op", elapsed / iterations);
}

fn bench_lock_unlock() {
    println!("Benchmark 1: Lifecycle lock/unlock");
    println!("-----------------------------------");

    let lc = Lifecycle::new();
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let claim = black_box(lc.lock()).unwrap_or_else(|err| panic!("{err}"));
        lc.unlock(claim);
    }
    report("Uncontended", ITERATIONS, start.elapsed());

    let outer = lc.lock().unwrap_or_else(|err| panic!("{err}"));
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let claim = black_box(lc.lock()).unwrap_or_else(|err| panic!("{err}"));
        lc.unlock(claim);
    }
    report("Reentrant", ITERATIONS, start.elapsed());
    lc.unlock(outer);
}

fn bench_contended_wrappers() {
    println!("\nBenchmark 2: Object wrapper under contention");
    println!("--------------------------------------------");

    for threads in [2u32, 4, 8] {
        let object = make_lifecycle(0u64);
        let per_thread = ITERATIONS / threads;
        let start = Instant::now();

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let object = Arc::clone(&object);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        black_box(use_object(&object).get());
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        report(&format!("{threads} threads"), per_thread * threads, start.elapsed());
    }
}

fn bench_enter_leave() {
    println!("\nBenchmark 3: Stack trace enter/leave");
    println!("------------------------------------");

    let manager = match StackTraceManager::start(ManagerConfig::default()) {
        Ok(manager) => manager,
        Err(err) => {
            println!("manager did not start: {err}");
            return;
        }
    };

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let _ = black_box(manager.enter(c"bench.rs", c"frame"));
        manager.leave(c"bench.rs", c"frame");
    }
    report("Enter + leave", ITERATIONS, start.elapsed());

    let mut frames = 0usize;
    let _ = manager.enter(c"bench.rs", c"outer");
    let start = Instant::now();
    for _ in 0..ITERATIONS / 10 {
        manager.visit(|_, _| frames += 1);
    }
    report("Visit (depth 1)", ITERATIONS / 10, start.elapsed());
    black_box(frames);
    manager.close();
}

fn bench_pool() {
    println!("\nBenchmark 4: Pool alloc/free");
    println!("----------------------------");

    let mut pool = Pool::with_capacity(1024);
    let start = Instant::now();
    for i in 0..ITERATIONS {
        if let Ok(handle) = pool.alloc(i) {
            black_box(pool.free(handle).ok());
        }
    }
    report("Alloc + free", ITERATIONS, start.elapsed());
    println!("{:?}", pool.stats());
}

fn main() {
    println!("\n=== Lifecycle Sync - Performance Benchmarks ===\n");

    bench_lock_unlock();
    bench_contended_wrappers();
    bench_enter_leave();
    bench_pool();

    println!("\n=== Benchmarks Complete ===");
}
