//! Per-thread call stack recording.
//!
//! Code marks function entry and exit with [`StackTraceManager::enter`] and
//! [`StackTraceManager::leave`] (or the [`auto_stack_trace!`](crate::auto_stack_trace)
//! macro), and any thread can dump its own current stack with
//! [`StackTraceManager::visit`]. Records of exited threads are freed by a
//! background watcher.
//!
//! Three layers are provided:
//! - [`StackTraceManager`]: an owned instance, started and closed explicitly.
//! - [`global`]: one process-wide instance behind free functions that never fail loudly.
//! - [`ffi`]: the process-wide instance as `extern "C"` functions.

pub mod config;
pub mod ffi;
pub mod global;
pub mod guard;
mod manager;
pub(crate) mod watcher;

pub use config::ManagerConfig;
pub use guard::FrameGuard;
pub use manager::{Frame, ManagerStats, StackTraceManager};
pub use watcher::ThreadKey;
