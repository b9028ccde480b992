use lifecycle_sync::stack_trace::{global, ManagerConfig};
use lifecycle_sync::auto_stack_trace;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn dump(title: &str) {
    println!("{title}");
    global::visit(|file, func| {
        println!("    at {} ({})", func.to_string_lossy(), file.to_string_lossy());
    });
}

fn func3() {
    auto_stack_trace!("func3");
    dump("Stack of the main thread, deepest call first:");
}

fn func2() {
    auto_stack_trace!("func2");
    func3();
}

fn func1() {
    auto_stack_trace!("func1");
    func2();
}

fn nested(level: usize) -> usize {
    auto_stack_trace!("nested");
    if level == 0 {
        return global::snapshot().len();
    }
    nested(level - 1)
}

fn worker(id: usize) {
    auto_stack_trace!("worker");
    let depth = nested(id);
    println!("  worker {id}: {depth} frame(s) on its stack at the deepest point");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("\n=== Stack Trace Manager Demo ===\n");

    let config = ManagerConfig::default().poll_interval(Duration::from_millis(10));
    if !global::start_with(config) {
        eprintln!("stack trace manager did not start");
        return;
    }

    func1();

    println!("\nSpawning worker threads");
    println!("-----------------------");
    let handles: Vec<_> = (0..4).map(|id| thread::spawn(move || worker(id))).collect();
    for handle in handles {
        let _ = handle.join();
    }

    // Give the watcher a few rounds to notice the exits
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match global::stats() {
            Some(stats) if stats.reclaimed_traces >= 4 => break,
            _ => thread::sleep(Duration::from_millis(10)),
        }
    }

    if let Some(stats) = global::stats() {
        println!("\nManager statistics");
        println!("------------------");
        println!("Live thread records: {}", stats.live_traces);
        println!("Live frames:         {}", stats.live_frames);
        println!("Watched threads:     {}", stats.watched_threads);
        println!("Reclaimed records:   {}", stats.reclaimed_traces);
        println!("Dropped calls:       {}", stats.dropped_calls);
    }

    global::close();
    println!("\n=== Demo Complete ===");
}
