use lifecycle_sync::{make_lifecycle, use_object};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

struct Device {
    name: &'static str,
    frames_rendered: AtomicU64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("\n=== Lifecycle Guard Demo ===\n");

    let device = make_lifecycle(Device {
        name: "display-0",
        frames_rendered: AtomicU64::new(0),
    });

    let readers: Vec<_> = (0..4)
        .map(|id| {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                let mut rendered = 0u64;
                loop {
                    let claim = use_object(&device);
                    let Some(dev) = claim.get() else {
                        break;
                    };
                    dev.frames_rendered.fetch_add(1, Ordering::Relaxed);
                    rendered += 1;
                    thread::sleep(Duration::from_millis(1));
                }
                println!("  reader {id}: rendered {rendered} frame(s) before release");
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));

    {
        let claim = use_object(&device);
        if let Some(dev) = claim.get() {
            let holders = device.lifecycle().use_count();
            println!("Releasing {} while {holders} thread(s) hold it", dev.name);
        }
    }

    let start = Instant::now();
    device.release();
    println!(
        "Release returned after {:?}, use count {}",
        start.elapsed(),
        device.lifecycle().use_count()
    );

    for reader in readers {
        let _ = reader.join();
    }

    println!("New claims after release: valid = {}", use_object(&device).valid());
    match Arc::try_unwrap(device) {
        Ok(owner) => {
            let dev = owner.into_inner();
            println!("Total frames rendered: {}", dev.frames_rendered.load(Ordering::Relaxed));
        }
        Err(_) => eprintln!("device still shared"),
    }

    println!("\n=== Demo Complete ===");
}
