//! The worker pool and its backend contract (§4.5, §6).
//!
//! `WorkerBackend` is the narrow trait the core depends on, grounded on
//! `raya_sdk::handler::NativeHandler`'s shape (a single trait implemented
//! by an external collaborator; the core never reaches past it). The
//! concrete spawning mechanism — forked processes, a real process pool,
//! anything — is explicitly out of the core's responsibility (§1, §6); this
//! crate ships one concrete backend, [`ThreadWorkerBackend`], standing in
//! for that black box so the pool is usable and testable end to end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Error;
use crate::value::Value;

/// The worker pool's own design parameter (SPEC_FULL §1's ambient-stack
/// config section), grounded on the same plain-config-struct shape as
/// `SchedulerConfig` (`raya-engine/src/vm/scheduler/scheduler.rs::
/// SchedulerLimits`) but kept as its own type rather than folded into
/// `SchedulerConfig`, matching §4.5's `setSize(n>0)` naming its own
/// concurrency limit distinctly from the scheduler's idle-sleep/poll-
/// timeout parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig { size: 4 }
    }
}

/// Identifier for a submitted off-process (here: off-thread) computation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    fn new() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A unit of work handed to the backend. Must be `Send` — it genuinely
/// crosses a thread boundary, unlike the cooperative `Task` bodies that
/// never leave the scheduler thread.
pub type Computation = Box<dyn FnOnce() -> Result<Value, Error> + Send + 'static>;

/// The backend contract (§6): schedule off-process, report results
/// non-blockingly, report free capacity. `set_size` is this crate's own
/// addition to §6's three-method contract — `WorkerPool::set_size`
/// (§4.5's `setSize(n>0)`) needs *some* way to reach the backend's own
/// concurrency ceiling, or raising the pool's size limit would have no
/// effect on `available()`'s bottleneck.
pub trait WorkerBackend {
    fn submit(&mut self, id: JobId, computation: Computation);
    fn poll(&mut self) -> Vec<(JobId, Result<Value, Error>)>;
    fn available(&self) -> usize;
    fn set_size(&mut self, n: usize);
}

/// Stand-in backend: a fixed-size pool of OS threads. Each `submit` spawns
/// a thread that runs the computation and sends its result back over a
/// `crossbeam_channel`, the same reactor/worker message-passing pattern
/// `raya-engine/src/vm/scheduler/reactor.rs` uses for its VM- and IO-worker
/// result channels; `available()` reflects the configured size minus
/// threads currently in flight, giving the same "bounded concurrency,
/// exactly-once execution, no shared mutable state with the parent"
/// contract §4.5 requires without committing to real process isolation
/// (§1 Non-goals explicitly place the spawning mechanism out of the core's
/// scope).
pub struct ThreadWorkerBackend {
    size: usize,
    in_flight: usize,
    tx: Sender<(JobId, Result<Value, Error>)>,
    rx: Receiver<(JobId, Result<Value, Error>)>,
}

impl ThreadWorkerBackend {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        ThreadWorkerBackend {
            size: size.max(1),
            in_flight: 0,
            tx,
            rx,
        }
    }
}

impl WorkerBackend for ThreadWorkerBackend {
    fn submit(&mut self, id: JobId, computation: Computation) {
        self.in_flight += 1;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(computation))
                .unwrap_or_else(|payload| {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker computation panicked".to_string());
                    Err(Error::Worker(msg))
                });
            let _ = tx.send((id, result));
        });
    }

    fn poll(&mut self) -> Vec<(JobId, Result<Value, Error>)> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            out.push(item);
        }
        out
    }

    fn available(&self) -> usize {
        self.size.saturating_sub(self.in_flight)
    }

    fn set_size(&mut self, n: usize) {
        self.size = n.max(1);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum JobState {
    Pending,
    Running,
}

/// The pool: pending/in-flight bookkeeping plus the `results` correlation
/// map, on top of whatever `WorkerBackend` is configured (§4.5).
pub struct WorkerPool {
    backend: Box<dyn WorkerBackend>,
    size: usize,
    pending: VecDeque<(JobId, Computation)>,
    job_states: FxHashMap<JobId, JobState>,
    results: FxHashMap<JobId, Result<Value, Error>>,
    in_flight_ids: FxHashSet<JobId>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        WorkerPool::with_backend(size, Box::new(ThreadWorkerBackend::new(size)))
    }

    pub fn with_backend(size: usize, backend: Box<dyn WorkerBackend>) -> Self {
        WorkerPool {
            backend,
            size: size.max(1),
            pending: VecDeque::new(),
            job_states: FxHashMap::default(),
            results: FxHashMap::default(),
            in_flight_ids: FxHashSet::default(),
        }
    }

    /// `setSize(n>0)` (§4.5): updates both the pool's own concurrency
    /// limit and the backend's, so raising it actually raises achievable
    /// concurrency rather than leaving the backend's construction-time
    /// size as a permanent bottleneck.
    pub fn set_size(&mut self, n: usize) -> Result<(), Error> {
        if n == 0 {
            return Err(Error::invalid_argument("worker pool size must be > 0"));
        }
        self.size = n;
        self.backend.set_size(n);
        Ok(())
    }

    /// `add(f)` (§4.5): register a pending computation, return its id.
    /// Jobs past the concurrency limit stay `Pending` until a slot frees.
    pub fn add(&mut self, computation: Computation) -> JobId {
        let id = JobId::new();
        self.job_states.insert(id, JobState::Pending);
        self.pending.push_back((id, computation));
        id
    }

    /// `run()` (§4.5): start as many pending jobs as the size/backend
    /// allows; never blocks. Returns whether any submission or result
    /// delivery happened this call (feeds the scheduler's idle-sleep
    /// decision, §4.1).
    pub fn run_once(&mut self) -> bool {
        let mut progressed = false;

        let capacity = self.size.saturating_sub(self.in_flight_ids.len());
        let slots = capacity.min(self.backend.available());
        for _ in 0..slots {
            let Some((id, computation)) = self.pending.pop_front() else {
                break;
            };
            self.job_states.insert(id, JobState::Running);
            self.in_flight_ids.insert(id);
            self.backend.submit(id, computation);
            progressed = true;
        }

        for (id, result) in self.backend.poll() {
            self.in_flight_ids.remove(&id);
            self.job_states.remove(&id);
            self.results.insert(id, result);
            progressed = true;
        }

        progressed
    }

    /// Non-blocking check of `results[id]`; consumes the entry once read so
    /// the owning `Task`'s own completion state takes over afterwards.
    pub fn take_result(&mut self, id: JobId) -> Option<Result<Value, Error>> {
        self.results.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight_ids.is_empty() && self.results.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{boxed, downcast};
    use std::time::{Duration, Instant};

    #[test]
    fn add_and_drain_one_job() {
        let mut pool = WorkerPool::new(2);
        let id = pool.add(Box::new(|| Ok(boxed(21i32 * 2))));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut result = None;
        while Instant::now() < deadline {
            pool.run_once();
            if let Some(r) = pool.take_result(id) {
                result = Some(r);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let v = result.expect("job did not complete in time").expect("job ok");
        assert_eq!(downcast::<i32>(v), 42);
    }

    #[test]
    fn jobs_past_limit_stay_pending_until_a_slot_frees() {
        let mut pool = WorkerPool::new(1);
        let _a = pool.add(Box::new(|| {
            thread::sleep(Duration::from_millis(50));
            Ok(boxed(1i32))
        }));
        let _b = pool.add(Box::new(|| Ok(boxed(2i32))));

        pool.run_once();
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.in_flight_count(), 1);
    }

    #[test]
    fn backend_error_surfaces_as_worker_error() {
        let mut pool = WorkerPool::new(1);
        let id = pool.add(Box::new(|| Err(Error::Worker("boom".into()))));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut result = None;
        while Instant::now() < deadline {
            pool.run_once();
            if let Some(r) = pool.take_result(id) {
                result = Some(r);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        match result.expect("job did not complete") {
            Err(Error::Worker(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Worker error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn set_size_rejects_zero() {
        let mut pool = WorkerPool::new(2);
        assert!(pool.set_size(0).is_err());
        assert!(pool.set_size(4).is_ok());
    }

    #[test]
    fn set_size_increase_raises_the_backend_s_own_concurrency_ceiling() {
        // Regression: `setSize` used to update only `WorkerPool.size`,
        // leaving the backend's own limit frozen at construction — so
        // `available()` stayed the old, smaller number forever.
        let mut pool = WorkerPool::new(1);
        assert_eq!(pool.backend.available(), 1);
        pool.set_size(3).unwrap();
        assert_eq!(pool.backend.available(), 3);

        let a = pool.add(Box::new(|| {
            thread::sleep(Duration::from_millis(50));
            Ok(boxed(1i32))
        }));
        let b = pool.add(Box::new(|| Ok(boxed(2i32))));
        let c = pool.add(Box::new(|| Ok(boxed(3i32))));

        pool.run_once();
        // All three should be admitted at once now that the backend's
        // ceiling was raised to match the pool's.
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.in_flight_count(), 3);

        let mut results = FxHashMap::default();
        let deadline = Instant::now() + Duration::from_secs(2);
        while results.len() < 3 && Instant::now() < deadline {
            pool.run_once();
            for id in [a, b, c] {
                if let Some(r) = pool.take_result(id) {
                    results.insert(id, r);
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(results.len(), 3, "all three jobs should have completed");
    }
}
