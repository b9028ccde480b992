use thiserror::Error;

/// Failures reported by the fixed-capacity [`Pool`](crate::pool::Pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool capacity exhausted")]
    Exhausted,
    #[error("handle refers to a freed or reused slot")]
    StaleHandle,
}

impl PoolError {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolError::Exhausted => "Pool capacity exhausted",
            PoolError::StaleHandle => "Handle refers to a freed or reused slot",
        }
    }
}

/// Failures reported by [`Lifecycle::lock`](crate::lifecycle::Lifecycle::lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The guarded object has been released; no new claims are granted.
    #[error("object has been released")]
    Released,
    /// The configured maximum number of holder threads was reached.
    #[error("too many threads hold the object")]
    HolderLimit,
}

impl LifecycleError {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleError::Released => "Object has been released",
            LifecycleError::HolderLimit => "Too many threads hold the object",
        }
    }
}

/// Failures inside the stack trace manager.
///
/// These never cross the [`global`](crate::stack_trace::global) or
/// [`ffi`](crate::stack_trace::ffi) boundary; both swallow them after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("stack trace pool: {0}")]
    Pool(#[from] PoolError),
    #[error("watch set is full")]
    WatchSetFull,
    #[error("stack trace manager is not started")]
    NotStarted,
    #[error("stack trace manager is already started")]
    AlreadyStarted,
    #[error("invalid manager configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn the watcher thread")]
    Spawn,
    #[error("calling thread is exiting")]
    ThreadExiting,
}

impl TraceError {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceError::Pool(err) => err.as_str(),
            TraceError::WatchSetFull => "Watch set is full",
            TraceError::NotStarted => "Stack trace manager is not started",
            TraceError::AlreadyStarted => "Stack trace manager is already started",
            TraceError::InvalidConfig(reason) => reason,
            TraceError::Spawn => "Failed to spawn the watcher thread",
            TraceError::ThreadExiting => "Calling thread is exiting",
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
pub type LifecycleResult<T> = Result<T, LifecycleError>;
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_converts_into_trace_error() {
        let err: TraceError = PoolError::Exhausted.into();
        assert_eq!(err, TraceError::Pool(PoolError::Exhausted));
        assert_eq!(err.as_str(), "Pool capacity exhausted");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(LifecycleError::Released.to_string(), "object has been released");
        assert_eq!(
            TraceError::Pool(PoolError::StaleHandle).to_string(),
            "stack trace pool: handle refers to a freed or reused slot"
        );
    }
}
