//! Small synchronization helpers shared by the guard and the tracer.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
use std::time::Duration;

/// Per-call trace events, compiled in only with the `trace-debug` feature.
macro_rules! sync_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace-debug")]
        tracing::trace!($($arg)*);
    };
}

pub(crate) use sync_trace;

/// Lock a mutex, ignoring poisoning.
///
/// The state behind every mutex in this crate stays consistent across a
/// panic in user code, because no user code runs while the lock is held
/// except `visit` callbacks, which only observe.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait_while<'a, T, F>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    condition: F,
) -> MutexGuard<'a, T>
where
    F: FnMut(&mut T) -> bool,
{
    cond.wait_while(guard, condition)
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait_timeout_while<'a, T, F>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    condition: F,
) -> (MutexGuard<'a, T>, WaitTimeoutResult)
where
    F: FnMut(&mut T) -> bool,
{
    cond.wait_timeout_while(guard, timeout, condition)
        .unwrap_or_else(PoisonError::into_inner)
}
