//! Smoke tests to verify basic functionality

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use lifecycle_sync::stack_trace::global;
use lifecycle_sync::{
    make_lifecycle, use_object, Claim, Frame, Lifecycle, LifecycleError, ManagerConfig, Pool,
    PoolError, StackTraceManager,
};

static GLOBAL_SERIAL: Mutex<()> = Mutex::new(());

fn global_serial() -> MutexGuard<'static, ()> {
    GLOBAL_SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every thread that locks once is counted once
#[test]
fn test_use_count_matches_holding_threads() {
    const THREADS: usize = 8;
    let lc = Arc::new(Lifecycle::new());
    let locked = Arc::new(Barrier::new(THREADS + 1));
    let checked = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lc = lc.clone();
            let locked = locked.clone();
            let checked = checked.clone();
            thread::spawn(move || {
                let claim = lc.lock().unwrap();
                let nested = lc.lock().unwrap();
                assert_eq!(nested, Claim::Reentered);
                locked.wait();
                checked.wait();
                lc.unlock(nested);
                lc.unlock(claim);
            })
        })
        .collect();

    locked.wait();
    assert_eq!(lc.use_count(), THREADS);
    checked.wait();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lc.use_count(), 0);
}

/// Release blocks until the last holder unlocks, then refuses new claims
#[test]
fn test_release_blocks_until_holder_unlocks() {
    let lc = Arc::new(Lifecycle::new());
    let (locked_tx, locked_rx) = mpsc::channel();
    let unlocked = Arc::new(AtomicUsize::new(0));

    let holder = {
        let lc = lc.clone();
        let unlocked = unlocked.clone();
        thread::spawn(move || {
            let claim = lc.lock().unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            unlocked.store(1, Ordering::SeqCst);
            lc.unlock(claim);
        })
    };

    locked_rx.recv().unwrap();
    lc.release();

    assert_eq!(unlocked.load(Ordering::SeqCst), 1);
    assert_eq!(lc.use_count(), 0);
    assert_eq!(lc.lock(), Err(LifecycleError::Released));
    holder.join().unwrap();
}

/// A nested lock fails once release has started; the outer claim still unblocks it
#[test]
fn test_nested_lock_after_release_started() {
    let lc = Arc::new(Lifecycle::new());
    let claim = lc.lock().unwrap();

    let releaser = {
        let lc = lc.clone();
        thread::spawn(move || lc.release())
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !lc.is_released() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(lc.is_released());
    assert!(!releaser.is_finished());

    assert_eq!(lc.lock(), Err(LifecycleError::Released));
    assert_eq!(lc.use_count(), 1);

    lc.unlock(claim);
    releaser.join().unwrap();
    assert_eq!(lc.use_count(), 0);
}

/// A holder may release the object it is using
#[test]
fn test_self_release_inside_wrapper() {
    let device = make_lifecycle(String::from("device"));
    let outer = use_object(&device);
    let inner = use_object(&device);
    assert!(outer.valid() && inner.valid());

    device.release();
    assert!(device.is_released());
    assert_eq!(device.lifecycle().use_count(), 0);

    drop(inner);
    drop(outer);
    assert_eq!(device.lifecycle().use_count(), 0);
    assert!(!use_object(&device).valid());
}

/// Bounded release reports a holder that does not finish in time
#[test]
fn test_try_release_for_times_out() {
    let lc = Arc::new(Lifecycle::new());
    let (locked_tx, locked_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let holder = {
        let lc = lc.clone();
        thread::spawn(move || {
            let claim = lc.lock().unwrap();
            locked_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            lc.unlock(claim);
        })
    };

    locked_rx.recv().unwrap();
    assert!(!lc.try_release_for(Duration::from_millis(20)));
    assert!(lc.is_released());

    done_tx.send(()).unwrap();
    holder.join().unwrap();
    assert!(lc.try_release_for(Duration::from_secs(5)));
}

#[test]
fn test_pool_rejects_stale_handles() {
    let mut pool = Pool::with_capacity(2);
    let a = pool.alloc("a").unwrap();
    let b = pool.alloc("b").unwrap();
    assert_eq!(pool.alloc("c"), Err(PoolError::Exhausted));

    assert_eq!(pool.free(a), Ok("a"));
    let c = pool.alloc("c").unwrap();
    assert_eq!(c.index(), a.index());

    assert_eq!(pool.get(a), None);
    assert_eq!(pool.free(a), Err(PoolError::StaleHandle));
    assert_eq!(pool.get(c), Some(&"c"));
    assert_eq!(pool.get(b), Some(&"b"));
}

/// enter(A), enter(B), visit reports [B, A]
#[test]
fn test_visit_order_and_reclamation() {
    let manager = Arc::new(
        StackTraceManager::start(ManagerConfig::default().poll_interval(Duration::from_millis(5)))
            .unwrap(),
    );

    let worker = manager.clone();
    let seen = thread::spawn(move || {
        worker.enter(c"smoke.rs", c"A").unwrap();
        worker.enter(c"smoke.rs", c"B").unwrap();
        let mut seen = Vec::new();
        worker.visit(|_, func| seen.push(func));
        seen
    })
    .join()
    .unwrap();
    assert_eq!(seen, vec![c"B", c"A"]);

    // The thread exited without leaving; its record and frames are freed
    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.stats().reclaimed_traces == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    let stats = manager.stats();
    assert_eq!(stats.reclaimed_traces, 1);
    assert_eq!(stats.live_traces, 0);
    assert_eq!(stats.live_frames, 0);
}

#[test]
fn test_global_facade_round_trip() {
    let _serial = global_serial();
    global::close();
    assert!(global::start());

    assert!(global::enter(c"smoke.rs", c"outer"));
    {
        lifecycle_sync::auto_stack_trace!("inner");
        let frames = global::snapshot();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].func, c"inner");
        assert_eq!(frames[1], Frame::new(c"smoke.rs", c"outer"));
    }
    assert!(global::leave(c"smoke.rs", c"outer"));
    assert!(global::snapshot().is_empty());

    global::close();
    assert!(!global::enter(c"smoke.rs", c"late"));
}
