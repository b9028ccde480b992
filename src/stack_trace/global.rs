//! Process-wide stack trace manager.
//!
//! Start it once with [`start`] and shut it down with [`close`]; every other
//! call is a no-op returning an empty result while no manager is running.
//! Nothing here returns an error or lets a panic escape: failures are
//! logged and the call is dropped.

use super::{Frame, ManagerConfig, ManagerStats, StackTraceManager};
use crate::error::TraceError;
use core::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

static MANAGER: spin::Mutex<Option<Arc<StackTraceManager>>> = spin::Mutex::new(None);

fn current() -> Option<Arc<StackTraceManager>> {
    MANAGER.lock().clone()
}

fn guarded<R>(op: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(op, "panic in stack trace manager swallowed");
            None
        }
    }
}

/// Start the process-wide manager with the default configuration.
pub fn start() -> bool {
    start_with(ManagerConfig::default())
}

/// Start the process-wide manager. Returns `false` if one is already
/// running or it could not be started.
pub fn start_with(config: ManagerConfig) -> bool {
    if is_started() {
        tracing::debug!(error = %TraceError::AlreadyStarted, "stack trace start ignored");
        return false;
    }

    // Spawning the watcher happens outside the slot lock.
    let manager = match guarded("start", || StackTraceManager::start(config)) {
        Some(Ok(manager)) => manager,
        Some(Err(err)) => {
            tracing::warn!(error = %err, "stack trace manager failed to start");
            return false;
        }
        None => return false,
    };

    let mut slot = MANAGER.lock();
    if slot.is_some() {
        drop(slot);
        // Lost a race with another start; this one never served a call.
        guarded("close", || manager.close());
        tracing::debug!(error = %TraceError::AlreadyStarted, "stack trace start ignored");
        return false;
    }
    *slot = Some(Arc::new(manager));
    true
}

/// Stop the process-wide manager and drop its records.
pub fn close() {
    let manager = MANAGER.lock().take();
    if let Some(manager) = manager {
        guarded("close", || manager.close());
    }
}

pub fn is_started() -> bool {
    MANAGER.lock().is_some()
}

/// Push a frame for the calling thread. Returns whether it was recorded.
pub fn enter(file: &'static CStr, func: &'static CStr) -> bool {
    let Some(manager) = current() else {
        return false;
    };

    match guarded("enter", || manager.enter(file, func)) {
        Some(Ok(())) => true,
        Some(Err(err)) => {
            tracing::warn!(error = %err, func = ?func, "stack trace frame dropped");
            false
        }
        None => false,
    }
}

/// Pop the calling thread's top frame if it is `(file, func)`.
pub fn leave(file: &CStr, func: &CStr) -> bool {
    let Some(manager) = current() else {
        return false;
    };
    guarded("leave", || manager.leave(file, func)).unwrap_or(false)
}

/// Walk the calling thread's stack, most recent frame first.
pub fn visit<F>(callback: F)
where
    F: FnMut(&'static CStr, &'static CStr),
{
    if let Some(manager) = current() {
        guarded("visit", || manager.visit(callback));
    }
}

pub fn snapshot() -> Vec<Frame> {
    current()
        .and_then(|manager| guarded("snapshot", || manager.snapshot()))
        .unwrap_or_default()
}

pub fn stats() -> Option<ManagerStats> {
    current().and_then(|manager| guarded("stats", || manager.stats()))
}
