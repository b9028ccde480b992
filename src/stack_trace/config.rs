use crate::error::{TraceError, TraceResult};
use std::time::Duration;

/// Sizing and timing for a [`StackTraceManager`](super::StackTraceManager).
///
/// Pool capacities are hard upper bounds; the pools never grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of threads with a live stack record
    pub trace_capacity: usize,
    /// Maximum number of frames across all threads
    pub frame_capacity: usize,
    /// Maximum number of thread exit signals being watched
    pub watch_capacity: usize,
    /// Number of exit signals checked per wait round
    pub wait_chunk: usize,
    /// Upper bound on a single wait round
    pub poll_interval: Duration,
    /// Name given to the watcher thread
    pub worker_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            trace_capacity: 1024,
            frame_capacity: 64 * 1024,
            watch_capacity: 1024,
            wait_chunk: 8,
            poll_interval: Duration::from_millis(20),
            worker_name: String::from("stack-trace-watcher"),
        }
    }
}

impl ManagerConfig {
    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    pub fn frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = capacity;
        self
    }

    pub fn watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity;
        self
    }

    pub fn wait_chunk(mut self, chunk: usize) -> Self {
        self.wait_chunk = chunk;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn validate(&self) -> TraceResult<()> {
        if self.trace_capacity == 0 {
            return Err(TraceError::InvalidConfig("trace capacity must be non-zero"));
        }
        if self.frame_capacity == 0 {
            return Err(TraceError::InvalidConfig("frame capacity must be non-zero"));
        }
        if self.watch_capacity == 0 {
            return Err(TraceError::InvalidConfig("watch capacity must be non-zero"));
        }
        if self.wait_chunk == 0 {
            return Err(TraceError::InvalidConfig("wait chunk must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(TraceError::InvalidConfig("poll interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wait_chunk, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_zero_values() {
        let zero_chunk = ManagerConfig::default().wait_chunk(0);
        assert!(matches!(zero_chunk.validate(), Err(TraceError::InvalidConfig(_))));

        let zero_interval = ManagerConfig::default().poll_interval(Duration::ZERO);
        assert!(zero_interval.validate().is_err());

        let zero_frames = ManagerConfig::default().frame_capacity(0);
        assert!(zero_frames.validate().is_err());
    }
}
