//! Thread-safe object lifecycle guards and per-thread call stack tracing.
//!
//! - [`Lifecycle`] / [`ObjectLifecycle`]: shared, reentrant use of an object
//!   with a one-way release that blocks until every holder is gone.
//! - [`ObjectWrapper`]: scoped claim returned by [`use_object`].
//! - [`StackTraceManager`]: per-thread frame stacks backed by fixed pools,
//!   with a watcher that frees the stacks of exited threads. A process-wide
//!   instance is available through [`stack_trace::global`] and as C functions
//!   in [`stack_trace::ffi`].

pub mod error;
pub mod lifecycle;
pub mod list;
pub mod object;
pub mod pool;
pub mod stack_trace;
mod sync;

pub use error::{
    LifecycleError, LifecycleResult, PoolError, PoolResult, TraceError, TraceResult,
};
pub use lifecycle::{Claim, Lifecycle};
pub use object::{make_lifecycle, use_object, ObjectLifecycle, ObjectLifecyclePtr, ObjectWrapper};
pub use pool::{Handle, Pool, PoolStats};
pub use stack_trace::{Frame, FrameGuard, ManagerConfig, ManagerStats, StackTraceManager};
