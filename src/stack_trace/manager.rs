use super::config::ManagerConfig;
use super::watcher::{self, ExitSignal, ThreadKey, WaitOutcome, WatchSet};
use crate::error::{PoolError, TraceError, TraceResult};
use crate::list::{self, Linked};
use crate::pool::{Handle, Pool};
use crate::sync::{self, sync_trace};
use core::ffi::CStr;
use core::fmt;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// One traced call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    pub file: &'static CStr,
    pub func: &'static CStr,
}

impl Frame {
    pub fn new(file: &'static CStr, func: &'static CStr) -> Self {
        Self { file, func }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.func.to_string_lossy(),
            self.file.to_string_lossy()
        )
    }
}

struct FrameNode {
    frame: Frame,
    next: Option<Handle<FrameNode>>,
}

impl Linked for FrameNode {
    fn next(&self) -> Option<Handle<Self>> {
        self.next
    }

    fn set_next(&mut self, next: Option<Handle<Self>>) {
        self.next = next;
    }
}

/// Stack record of one thread.
struct TraceNode {
    thread: ThreadKey,
    os_tid: Option<i64>,
    frames: Option<Handle<FrameNode>>,
    next: Option<Handle<TraceNode>>,
}

impl Linked for TraceNode {
    fn next(&self) -> Option<Handle<Self>> {
        self.next
    }

    fn set_next(&mut self, next: Option<Handle<Self>>) {
        self.next = next;
    }
}

struct Registry {
    traces: Pool<TraceNode>,
    frames: Pool<FrameNode>,
    head: Option<Handle<TraceNode>>,
}

impl Registry {
    fn new(config: &ManagerConfig) -> Self {
        Self {
            traces: Pool::with_capacity(config.trace_capacity),
            frames: Pool::with_capacity(config.frame_capacity),
            head: None,
        }
    }

    fn find(&self, thread: ThreadKey) -> Option<Handle<TraceNode>> {
        list::find(&self.traces, self.head, |trace| trace.thread == thread)
    }

    fn top_of(&self, thread: ThreadKey) -> Option<Handle<FrameNode>> {
        self.find(thread)
            .and_then(|trace| self.traces.get(trace))
            .and_then(|trace| trace.frames)
    }

    /// Unlink and free a thread's record with all of its frames.
    /// Returns the OS thread id and the number of frames still on the stack.
    fn remove(&mut self, thread: ThreadKey) -> Option<(Option<i64>, usize)> {
        let trace =
            list::remove_first(&mut self.traces, &mut self.head, |t| t.thread == thread)?;
        let mut node = self.traces.free(trace).ok()?;
        let frames = list::drain(&mut self.frames, &mut node.frames);
        Some((node.os_tid, frames))
    }
}

/// Point-in-time counters of a [`StackTraceManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Threads with a live stack record
    pub live_traces: usize,
    /// Frames on all stacks
    pub live_frames: usize,
    /// Exit signals being watched
    pub watched_threads: usize,
    pub trace_capacity: usize,
    pub frame_capacity: usize,
    /// Records freed after their thread exited
    pub reclaimed_traces: u64,
    /// `enter` calls that failed and recorded nothing
    pub dropped_calls: u64,
}

struct Shared {
    config: ManagerConfig,
    registry: Mutex<Registry>,
    watch: spin::Mutex<WatchSet>,
    running: AtomicBool,
    reclaimed: AtomicU64,
    dropped_calls: AtomicU64,
}

/// Per-thread call stack recorder with automatic cleanup of exited threads.
///
/// `enter`, `leave` and `visit` each take one registry lock. Records and
/// frames come from fixed-size pools sized by [`ManagerConfig`]; running
/// out of either is an error, never a reallocation. A background watcher
/// thread frees a thread's record shortly after that thread exits.
pub struct StackTraceManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StackTraceManager {
    /// Allocate the pools and spawn the watcher thread.
    pub fn start(config: ManagerConfig) -> TraceResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new(&config)),
            watch: spin::Mutex::new(WatchSet::with_capacity(config.watch_capacity)),
            running: AtomicBool::new(true),
            reclaimed: AtomicU64::new(0),
            dropped_calls: AtomicU64::new(0),
            config,
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(shared.config.worker_name.clone())
            .spawn(move || worker_shared.worker_loop())
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to spawn stack trace watcher");
                TraceError::Spawn
            })?;

        tracing::debug!(
            traces = shared.config.trace_capacity,
            frames = shared.config.frame_capacity,
            "stack trace manager started"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Push a frame onto the calling thread's stack.
    ///
    /// The first call from a thread creates its record and starts watching
    /// the thread for exit.
    pub fn enter(&self, file: &'static CStr, func: &'static CStr) -> TraceResult<()> {
        let result = self.shared.enter(Frame { file, func });
        if result.is_err() {
            self.shared.dropped_calls.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Pop the calling thread's top frame if it is `(file, func)`.
    ///
    /// A mismatched pair leaves the stack untouched and returns `false`.
    pub fn leave(&self, file: &CStr, func: &CStr) -> bool {
        self.shared.leave(file, func)
    }

    /// Call `callback` with each frame of the calling thread, most recent first.
    ///
    /// The registry lock is held throughout; `callback` must not call back
    /// into this manager.
    pub fn visit<F>(&self, mut callback: F)
    where
        F: FnMut(&'static CStr, &'static CStr),
    {
        let Some(thread) = watcher::current_key() else {
            return;
        };

        let registry = sync::lock(&self.shared.registry);
        list::for_each(&registry.frames, registry.top_of(thread), |node| {
            callback(node.frame.file, node.frame.func)
        });
    }

    /// Owned copy of the calling thread's stack, most recent first.
    pub fn snapshot(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.visit(|file, func| frames.push(Frame { file, func }));
        frames
    }

    /// Number of frames on the calling thread's stack.
    pub fn depth(&self) -> usize {
        let Some(thread) = watcher::current_key() else {
            return 0;
        };

        let registry = sync::lock(&self.shared.registry);
        list::len(&registry.frames, registry.top_of(thread))
    }

    pub fn stats(&self) -> ManagerStats {
        let (live_traces, live_frames) = {
            let registry = sync::lock(&self.shared.registry);
            (registry.traces.len(), registry.frames.len())
        };

        ManagerStats {
            live_traces,
            live_frames,
            watched_threads: self.shared.watch.lock().len(),
            trace_capacity: self.shared.config.trace_capacity,
            frame_capacity: self.shared.config.frame_capacity,
            reclaimed_traces: self.shared.reclaimed.load(Ordering::Relaxed),
            dropped_calls: self.shared.dropped_calls.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop and join the watcher. Later `enter` calls fail with
    /// [`TraceError::NotStarted`]; existing records stay readable.
    pub fn close(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            watcher::EXIT_EVENTS.notify();
        }

        let worker = sync::lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("stack trace watcher panicked");
            }
            self.shared.watch.lock().clear();
            tracing::debug!("stack trace manager closed");
        }
    }
}

impl Drop for StackTraceManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StackTraceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackTraceManager")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn enter(&self, frame: Frame) -> TraceResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(TraceError::NotStarted);
        }
        let thread = watcher::current_key().ok_or(TraceError::ThreadExiting)?;

        let mut registry = sync::lock(&self.registry);
        let trace = match registry.find(thread) {
            Some(trace) => trace,
            None => self.track_current_thread(&mut registry)?,
        };

        let node = registry.frames.alloc(FrameNode { frame, next: None })?;
        let Registry { traces, frames, .. } = &mut *registry;
        let trace = traces.get_mut(trace).ok_or(PoolError::StaleHandle)?;
        list::push_front(frames, &mut trace.frames, node);

        sync_trace!(thread, func = ?frame.func, "enter");
        Ok(())
    }

    fn leave(&self, file: &CStr, func: &CStr) -> bool {
        let Some(thread) = watcher::current_key() else {
            return false;
        };

        let mut registry = sync::lock(&self.registry);
        let Some(trace) = registry.find(thread) else {
            return false;
        };

        let Registry { traces, frames, .. } = &mut *registry;
        let Some(trace) = traces.get_mut(trace) else {
            return false;
        };
        let Some(top) = trace.frames else {
            return false;
        };

        match frames.get(top) {
            Some(node) if node.frame.file == file && node.frame.func == func => {
                trace.frames = node.next;
                frames.free(top).ok();
                sync_trace!(thread, ?func, "leave");
                true
            }
            _ => {
                sync_trace!(thread, ?func, "mismatched leave ignored");
                false
            }
        }
    }

    /// Create a record for the calling thread and start watching it.
    fn track_current_thread(&self, registry: &mut Registry) -> TraceResult<Handle<TraceNode>> {
        let signal = watcher::current_signal().ok_or(TraceError::ThreadExiting)?;
        let (thread, os_tid) = (signal.key(), signal.os_tid());

        let trace = registry.traces.alloc(TraceNode {
            thread,
            os_tid,
            frames: None,
            next: None,
        })?;

        if !self.watch.lock().push(signal) {
            registry.traces.free(trace).ok();
            return Err(TraceError::WatchSetFull);
        }

        list::push_front(&mut registry.traces, &mut registry.head, trace);
        tracing::debug!(thread, os_tid = ?os_tid, "tracking stack of new thread");
        Ok(trace)
    }

    fn worker_loop(&self) {
        let chunk_size = self.config.wait_chunk;
        let mut chunk: Vec<Arc<ExitSignal>> = Vec::with_capacity(chunk_size);
        let mut swept: Vec<Arc<ExitSignal>> = Vec::new();
        let mut seen = watcher::EXIT_EVENTS.generation();

        tracing::debug!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "stack trace watcher started"
        );

        while self.running.load(Ordering::Acquire) {
            let offset = self.watch.lock().next_chunk(chunk_size, &mut chunk);

            // Past the end after removals: wrap without waiting.
            if chunk.is_empty() && offset > 0 {
                self.watch.lock().advance(0, chunk_size);
                continue;
            }

            match watcher::wait_any(&chunk, seen, self.config.poll_interval) {
                WaitOutcome::Signaled(pos) => {
                    let exited = {
                        let mut watch = self.watch.lock();
                        let exited = watch.remove(offset + pos, &chunk[pos]);
                        watch.advance(chunk.len(), chunk_size);
                        exited
                    };
                    if let Some(signal) = exited {
                        self.reclaim(&signal);
                    }
                }
                // The exited thread may sit in any chunk.
                WaitOutcome::Woken(generation) => {
                    seen = generation;
                    self.sweep(&mut swept);
                }
                WaitOutcome::TimedOut => self.watch.lock().advance(chunk.len(), chunk_size),
            }
        }

        chunk.clear();
        tracing::debug!("stack trace watcher stopped");
    }

    /// Reclaim every watched thread that has exited.
    ///
    /// Signals are checked outside the watch lock, since the liveness probe
    /// is a syscall per thread.
    fn sweep(&self, scratch: &mut Vec<Arc<ExitSignal>>) {
        self.watch.lock().copy_all(scratch);
        scratch.retain(|signal| signal.is_signaled());

        for signal in scratch.drain(..) {
            let removed = self.watch.lock().remove_signal(&signal);
            if removed.is_some() {
                self.reclaim(&signal);
            }
        }
    }

    fn reclaim(&self, signal: &ExitSignal) {
        let thread = signal.key();
        let removed = sync::lock(&self.registry).remove(thread);

        match removed {
            Some((os_tid, frames)) => {
                self.reclaimed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    thread,
                    os_tid = ?os_tid,
                    frames,
                    "reclaimed stack of exited thread"
                );
            }
            None => {
                sync_trace!(thread, "exited thread had no stack record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn small_config() -> ManagerConfig {
        ManagerConfig::default()
            .trace_capacity(16)
            .frame_capacity(64)
            .watch_capacity(16)
            .poll_interval(Duration::from_millis(5))
    }

    fn wait_for(manager: &StackTraceManager, pred: impl Fn(&ManagerStats) -> bool) -> ManagerStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = manager.stats();
            if pred(&stats) || Instant::now() >= deadline {
                return stats;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_visit_reports_most_recent_first() {
        let manager = StackTraceManager::start(small_config()).unwrap();
        manager.enter(c"a.rs", c"outer").unwrap();
        manager.enter(c"b.rs", c"inner").unwrap();

        let mut seen = Vec::new();
        manager.visit(|file, func| seen.push((file, func)));
        assert_eq!(seen, vec![(c"b.rs", c"inner"), (c"a.rs", c"outer")]);

        assert!(manager.leave(c"b.rs", c"inner"));
        assert_eq!(manager.stats().live_frames, 1);
        assert!(manager.leave(c"a.rs", c"outer"));
        assert_eq!(manager.depth(), 0);
        assert_eq!(manager.stats().live_frames, 0);
    }

    #[test]
    fn test_mismatched_leave_is_noop() {
        let manager = StackTraceManager::start(small_config()).unwrap();
        manager.enter(c"a", c"b").unwrap();

        assert!(!manager.leave(c"x", c"y"));
        assert!(!manager.leave(c"a", c"y"));
        assert_eq!(manager.snapshot(), vec![Frame::new(c"a", c"b")]);

        assert!(manager.leave(c"a", c"b"));
        assert!(!manager.leave(c"a", c"b"));
    }

    #[test]
    fn test_labels_compare_by_content() {
        let manager = StackTraceManager::start(small_config()).unwrap();
        let file: &'static CStr = Box::leak(Box::<CStr>::from(c"same.rs"));
        manager.enter(file, c"f").unwrap();
        assert!(manager.leave(c"same.rs", c"f"));
    }

    #[test]
    fn test_stacks_are_per_thread() {
        let manager = Arc::new(StackTraceManager::start(small_config()).unwrap());
        manager.enter(c"main.rs", c"main").unwrap();

        let other = manager.clone();
        let seen = thread::spawn(move || {
            other.enter(c"worker.rs", c"work").unwrap();
            other.snapshot()
        })
        .join()
        .unwrap();

        assert_eq!(seen, vec![Frame::new(c"worker.rs", c"work")]);
        assert_eq!(manager.snapshot(), vec![Frame::new(c"main.rs", c"main")]);
    }

    #[test]
    fn test_exited_thread_is_reclaimed() {
        let manager = Arc::new(StackTraceManager::start(small_config()).unwrap());
        let before = manager.stats();

        let worker = manager.clone();
        thread::spawn(move || {
            worker.enter(c"t.rs", c"one").unwrap();
            worker.enter(c"t.rs", c"two").unwrap();
        })
        .join()
        .unwrap();

        let after = wait_for(&manager, |s| s.reclaimed_traces == 1);
        assert_eq!(after.reclaimed_traces, 1);
        assert_eq!(after.live_traces, before.live_traces);
        assert_eq!(after.live_frames, before.live_frames);
        assert_eq!(after.watched_threads, before.watched_threads);
    }

    #[test]
    fn test_exit_reclaimed_within_poll_interval_across_chunks() {
        const PARKED: usize = 20;
        let poll_interval = Duration::from_millis(250);
        let manager = Arc::new(
            StackTraceManager::start(
                ManagerConfig::default()
                    .trace_capacity(PARKED + 4)
                    .frame_capacity(64)
                    .watch_capacity(PARKED + 4)
                    .wait_chunk(8)
                    .poll_interval(poll_interval),
            )
            .unwrap(),
        );

        // Long-lived threads fill several chunks ahead of the one that exits
        let tracked = Arc::new(std::sync::Barrier::new(PARKED + 1));
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let stop_rx = Arc::new(Mutex::new(stop_rx));
        let parked: Vec<_> = (0..PARKED)
            .map(|_| {
                let manager = manager.clone();
                let tracked = tracked.clone();
                let stop_rx = stop_rx.clone();
                thread::spawn(move || {
                    manager.enter(c"park.rs", c"park").unwrap();
                    tracked.wait();
                    let _ = sync::lock(&stop_rx).recv();
                })
            })
            .collect();
        tracked.wait();

        for trial in 1..=3u64 {
            let worker = manager.clone();
            thread::spawn(move || worker.enter(c"short.rs", c"short").unwrap())
                .join()
                .unwrap();

            let exited_at = Instant::now();
            let stats = wait_for(&manager, |s| s.reclaimed_traces == trial);
            let elapsed = exited_at.elapsed();
            assert_eq!(stats.reclaimed_traces, trial);
            assert!(elapsed < poll_interval, "reclaimed after {elapsed:?}");
        }

        assert_eq!(manager.stats().live_traces, PARKED);
        drop(stop_tx);
        for handle in parked {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_trace_pool_exhaustion_is_deterministic() {
        let manager = Arc::new(StackTraceManager::start(small_config().trace_capacity(1)).unwrap());
        manager.enter(c"main.rs", c"main").unwrap();

        let other = manager.clone();
        let result = thread::spawn(move || other.enter(c"late.rs", c"late")).join().unwrap();

        assert_eq!(result, Err(TraceError::Pool(PoolError::Exhausted)));
        assert_eq!(manager.snapshot(), vec![Frame::new(c"main.rs", c"main")]);
        let stats = manager.stats();
        assert_eq!(stats.live_traces, 1);
        assert_eq!(stats.watched_threads, 1);
        assert_eq!(stats.dropped_calls, 1);
    }

    #[test]
    fn test_frame_pool_exhaustion() {
        let manager = StackTraceManager::start(small_config().frame_capacity(2)).unwrap();
        manager.enter(c"f", c"1").unwrap();
        manager.enter(c"f", c"2").unwrap();
        assert_eq!(manager.enter(c"f", c"3"), Err(TraceError::Pool(PoolError::Exhausted)));
        assert_eq!(manager.depth(), 2);
    }

    #[test]
    fn test_watch_set_full_leaves_no_record() {
        let manager = Arc::new(StackTraceManager::start(small_config().watch_capacity(1)).unwrap());
        manager.enter(c"main.rs", c"main").unwrap();

        let other = manager.clone();
        let result = thread::spawn(move || other.enter(c"x", c"y")).join().unwrap();
        assert_eq!(result, Err(TraceError::WatchSetFull));
        assert_eq!(manager.stats().live_traces, 1);
    }

    #[test]
    fn test_enter_after_close_fails() {
        let manager = StackTraceManager::start(small_config()).unwrap();
        manager.enter(c"a", c"b").unwrap();
        manager.close();

        assert!(!manager.is_running());
        assert_eq!(manager.enter(c"a", c"c"), Err(TraceError::NotStarted));
        // Existing records stay readable
        assert_eq!(manager.depth(), 1);
        manager.close();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = StackTraceManager::start(small_config().wait_chunk(0));
        assert!(matches!(result, Err(TraceError::InvalidConfig(_))));
    }
}
