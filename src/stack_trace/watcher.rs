//! Thread exit detection for the stack trace watcher.
//!
//! Every thread that records a frame gets one [`ExitSignal`], owned by a
//! thread-local hook. The hook raises the signal when the thread's TLS is
//! torn down and wakes every waiting watcher through a process-wide event
//! counter. On Linux the signal is also raised when a `tgkill(pid, tid, 0)`
//! probe reports that the OS thread no longer exists, which covers threads
//! that exit without running TLS destructors.

use crate::sync;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a traced thread. Never reused.
pub type ThreadKey = u64;

/// Exit notification for one traced thread.
#[derive(Debug)]
pub(crate) struct ExitSignal {
    key: ThreadKey,
    os_tid: Option<i64>,
    exited: AtomicBool,
}

impl ExitSignal {
    fn for_current_thread() -> Self {
        Self {
            key: NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed),
            os_tid: os_thread_id(),
            exited: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> ThreadKey {
        self.key
    }

    pub(crate) fn os_tid(&self) -> Option<i64> {
        self.os_tid
    }

    pub(crate) fn is_signaled(&self) -> bool {
        self.exited.load(Ordering::Acquire) || !os_thread_alive(self.os_tid)
    }

    fn raise(&self) {
        self.exited.store(true, Ordering::Release);
        EXIT_EVENTS.notify();
    }
}

struct ExitHook {
    signal: Arc<ExitSignal>,
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        self.signal.raise();
    }
}

thread_local! {
    static EXIT_HOOK: ExitHook = ExitHook {
        signal: Arc::new(ExitSignal::for_current_thread()),
    };
}

/// Key of the calling thread, or `None` while its TLS is being destroyed.
pub(crate) fn current_key() -> Option<ThreadKey> {
    EXIT_HOOK.try_with(|hook| hook.signal.key).ok()
}

/// Exit signal of the calling thread, or `None` while its TLS is being destroyed.
pub(crate) fn current_signal() -> Option<Arc<ExitSignal>> {
    EXIT_HOOK.try_with(|hook| hook.signal.clone()).ok()
}

/// Generation counter bumped on every thread exit and on watcher shutdown.
pub(crate) struct ExitEvents {
    generation: Mutex<u64>,
    cond: Condvar,
}

pub(crate) static EXIT_EVENTS: ExitEvents = ExitEvents {
    generation: Mutex::new(0),
    cond: Condvar::new(),
};

impl ExitEvents {
    /// Current event generation, for a later [`wait_any`].
    pub(crate) fn generation(&self) -> u64 {
        *sync::lock(&self.generation)
    }

    pub(crate) fn notify(&self) {
        let mut generation = sync::lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }
}

/// Outcome of one [`wait_any`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The signal at this index of the chunk is raised.
    Signaled(usize),
    /// Exit events fired since generation `seen`; carries the current one.
    /// The exited thread may be outside the chunk.
    Woken(u64),
    TimedOut,
}

/// Wait until a signal in `chunk` is raised, the exit event generation
/// moves past `seen`, or `timeout` elapses, whichever comes first.
pub(crate) fn wait_any(chunk: &[Arc<ExitSignal>], seen: u64, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    let mut generation = sync::lock(&EXIT_EVENTS.generation);

    loop {
        if let Some(pos) = chunk.iter().position(|signal| signal.is_signaled()) {
            return WaitOutcome::Signaled(pos);
        }
        if *generation != seen {
            return WaitOutcome::Woken(*generation);
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }

        generation = sync::wait_timeout_while(
            &EXIT_EVENTS.cond,
            generation,
            deadline - now,
            |current| *current == seen,
        )
        .0;
    }
}

/// Bounded set of exit signals, scanned round-robin in chunks.
#[derive(Debug)]
pub(crate) struct WatchSet {
    signals: Vec<Arc<ExitSignal>>,
    capacity: usize,
    offset: usize,
}

impl WatchSet {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            signals: Vec::with_capacity(capacity),
            capacity,
            offset: 0,
        }
    }

    /// Start watching `signal`. Returns `false` when the set is full.
    pub(crate) fn push(&mut self, signal: Arc<ExitSignal>) -> bool {
        if self.signals.len() >= self.capacity {
            return false;
        }
        self.signals.push(signal);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.signals.len()
    }

    /// Copy the current chunk into `out` and return its starting offset.
    pub(crate) fn next_chunk(&self, chunk_size: usize, out: &mut Vec<Arc<ExitSignal>>) -> usize {
        out.clear();
        // Removals can leave the offset past the end; that yields an empty chunk.
        let start = self.offset.min(self.signals.len());
        let end = (start + chunk_size).min(self.signals.len());
        out.extend_from_slice(&self.signals[start..end]);
        self.offset
    }

    /// Stop watching the signal at `pos` if it is still `expected`.
    /// O(1): the last signal moves into the freed position.
    pub(crate) fn remove(
        &mut self,
        pos: usize,
        expected: &Arc<ExitSignal>,
    ) -> Option<Arc<ExitSignal>> {
        match self.signals.get(pos) {
            Some(signal) if Arc::ptr_eq(signal, expected) => Some(self.signals.swap_remove(pos)),
            _ => None,
        }
    }

    /// Stop watching `expected`, wherever it is.
    pub(crate) fn remove_signal(&mut self, expected: &Arc<ExitSignal>) -> Option<Arc<ExitSignal>> {
        let pos = self.signals.iter().position(|signal| Arc::ptr_eq(signal, expected))?;
        Some(self.signals.swap_remove(pos))
    }

    /// Copy every watched signal into `out`.
    pub(crate) fn copy_all(&self, out: &mut Vec<Arc<ExitSignal>>) {
        out.clear();
        out.extend_from_slice(&self.signals);
    }

    /// Move to the next chunk, wrapping after a short one.
    pub(crate) fn advance(&mut self, scanned: usize, chunk_size: usize) {
        if scanned < chunk_size {
            self.offset = 0;
        } else {
            self.offset += chunk_size;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.signals.clear();
        self.offset = 0;
    }
}

#[cfg(target_os = "linux")]
fn os_thread_id() -> Option<i64> {
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    (tid > 0).then_some(tid as i64)
}

#[cfg(not(target_os = "linux"))]
fn os_thread_id() -> Option<i64> {
    None
}

#[cfg(target_os = "linux")]
fn os_thread_alive(tid: Option<i64>) -> bool {
    let Some(tid) = tid else {
        return true;
    };

    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::syscall(libc::SYS_tgkill, libc::getpid(), tid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(target_os = "linux"))]
fn os_thread_alive(_tid: Option<i64>) -> bool {
    true
}
