//! Lifecycle guard: shared use of an object with a blocking, one-way release.
//!
//! Any number of threads may hold a claim on a [`Lifecycle`] at once. A
//! thread's claims are reentrant: the first `lock` on a thread creates a
//! per-thread record and bumps the use count, nested `lock` calls only
//! report [`Claim::Reentered`]. [`Lifecycle::release`] forbids new claims
//! and blocks until every holder has unlocked. The releasing thread may be
//! a holder itself; its own contribution is dropped before waiting.
//!
//! Per-thread records live in thread-local storage keyed by a unique guard
//! id, so `lock` and `unlock` only touch atomics on the fast path. The
//! internal mutex exists solely to pair with the release condition
//! variable.

use crate::error::{LifecycleError, LifecycleResult};
use crate::sync::{self, sync_trace};
use core::fmt;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::cell::RefCell;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

/// Per-thread record for one guard the thread currently holds.
struct HolderRecord {
    guard_id: u64,
    /// Cleared when this thread released the guard while still holding it,
    /// so the final unlock must not decrement again.
    dec_use_count: bool,
}

thread_local! {
    static HELD: RefCell<Vec<HolderRecord>> = const { RefCell::new(Vec::new()) };
}

/// Outcome of a successful [`Lifecycle::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First claim of this thread; counted in the use count.
    Acquired,
    /// This thread already held the guard; nothing was counted.
    Reentered,
}

impl Claim {
    pub fn is_reentrant(self) -> bool {
        self == Claim::Reentered
    }
}

pub struct Lifecycle {
    id: u64,
    use_count: AtomicUsize,
    released: AtomicBool,
    holder_limit: Option<usize>,
    mutex: Mutex<()>,
    cond: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a guard that admits at most `limit` distinct holder threads.
    pub fn with_holder_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(holder_limit: Option<usize>) -> Self {
        Self {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
            use_count: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            holder_limit,
            mutex: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Claim the guarded object for the calling thread.
    ///
    /// Fails with [`LifecycleError::Released`] once [`release`](Self::release)
    /// has been called, and with [`LifecycleError::HolderLimit`] when the
    /// guard was built with a holder limit that is already reached.
    pub fn lock(&self) -> LifecycleResult<Claim> {
        if self.released.load(Ordering::SeqCst) {
            return Err(LifecycleError::Released);
        }

        if self.is_held_by_current_thread() {
            sync_trace!(guard = self.id, "reentrant lock");
            return Ok(Claim::Reentered);
        }

        self.increment()?;
        HELD.with(|held| {
            held.borrow_mut().push(HolderRecord {
                guard_id: self.id,
                dec_use_count: true,
            })
        });

        // A release that raced with the increment above either sees our
        // count and waits for us, or we see its flag here and back out.
        if self.released.load(Ordering::SeqCst) {
            self.unlock(Claim::Acquired);
            return Err(LifecycleError::Released);
        }

        sync_trace!(guard = self.id, "lock acquired");
        Ok(Claim::Acquired)
    }

    /// Give back a claim obtained from [`lock`](Self::lock) on this thread.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds no record for this guard, which
    /// means `lock` and `unlock` were not paired on the same thread.
    pub fn unlock(&self, claim: Claim) {
        if claim.is_reentrant() {
            return;
        }

        let record = HELD.with(|held| {
            let mut held = held.borrow_mut();
            held.iter()
                .position(|r| r.guard_id == self.id)
                .map(|pos| held.swap_remove(pos))
        });

        let Some(record) = record else {
            panic!("lifecycle unlock is not paired with lock on the same thread");
        };

        if record.dec_use_count {
            self.decrement();
        }

        sync_trace!(guard = self.id, "lock released");
    }

    /// Forbid new claims and block until every holder has unlocked.
    ///
    /// If the calling thread holds a claim, its share of the use count is
    /// dropped first so the call does not wait on itself; the thread must
    /// still `unlock` that claim later. There is no timeout: a holder that
    /// never unlocks blocks this call forever.
    pub fn release(&self) {
        self.begin_release();

        let guard = sync::lock(&self.mutex);
        let _guard = sync::wait_while(&self.cond, guard, |_| {
            self.use_count.load(Ordering::SeqCst) != 0
        });

        tracing::debug!(guard = self.id, "lifecycle released");
    }

    /// Like [`release`](Self::release), but gives up waiting after `timeout`.
    ///
    /// Returns `true` when all holders finished in time. The guard stays
    /// released either way.
    pub fn try_release_for(&self, timeout: Duration) -> bool {
        self.begin_release();

        let deadline = Instant::now() + timeout;
        let mut guard = sync::lock(&self.mutex);
        loop {
            if self.use_count.load(Ordering::SeqCst) == 0 {
                tracing::debug!(guard = self.id, "lifecycle released");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    guard = self.id,
                    holders = self.use_count(),
                    "lifecycle release timed out"
                );
                return false;
            }
            guard = sync::wait_timeout_while(&self.cond, guard, deadline - now, |_| {
                self.use_count.load(Ordering::SeqCst) != 0
            })
            .0;
        }
    }

    /// Number of distinct threads currently counted as holders.
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        HELD.with(|held| held.borrow().iter().any(|r| r.guard_id == self.id))
    }

    fn begin_release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                guard = self.id,
                holders = self.use_count(),
                "lifecycle release requested"
            );
        }

        let own_share = HELD.with(|held| {
            match held
                .borrow_mut()
                .iter_mut()
                .find(|r| r.guard_id == self.id && r.dec_use_count)
            {
                Some(record) => {
                    record.dec_use_count = false;
                    true
                }
                None => false,
            }
        });

        if own_share {
            self.decrement();
        }
    }

    fn increment(&self) -> LifecycleResult<()> {
        match self.holder_limit {
            None => {
                self.use_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(limit) => self
                .use_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    (count < limit).then_some(count + 1)
                })
                .map(|_| ())
                .map_err(|_| LifecycleError::HolderLimit),
        }
    }

    fn decrement(&self) {
        let previous = self.use_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "lifecycle use count underflow");

        if previous == 1 && self.released.load(Ordering::SeqCst) {
            // Taking the mutex orders this notify after the waiter's check.
            let _guard = sync::lock(&self.mutex);
            self.cond.notify_all();
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        let holders = self.use_count.load(Ordering::SeqCst);
        if holders > 0 {
            tracing::error!(guard = self.id, holders, "lifecycle dropped while in use");
            std::process::abort();
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id)
            .field("use_count", &self.use_count())
            .field("released", &self.is_released())
            .finish()
    }
}
