//! The scheduler driver (§4.1): one tick integrates the I/O poller, the
//! worker pool, and the ready queue; an idle-sleep keeps the loop from
//! spinning when nothing is happening.
//!
//! Grounded on `raya-engine/src/vm/scheduler/worker.rs`'s idle-sleep idiom
//! (`thread::sleep(Duration::from_micros(100))` when `find_work` comes back
//! empty) and `reactor.rs`'s single-loop-integrates-everything structure,
//! adapted from "N worker threads pulling from a shared injector" to "one
//! thread, three sub-ticks, round robin" since this core is single-threaded
//! by design (§1, §5).

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::io::poller::IoPoller;
use crate::ready_queue::ReadyQueue;
use crate::suspend::take_hard_suspend;
use crate::task::{JoinHandle, QueueOrigin, Task, TaskId};
use crate::value::{boxed, Value};
use crate::worker_pool::{Computation, JobId, WorkerPool, WorkerPoolConfig};

/// Where a spawned task runs (§4.3). `Io` is handled by [`Scheduler::spawn_blocking`]
/// rather than `spawn` — its body is an off-thread closure, not a `Future`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispatcher {
    Default,
    Main,
    Io,
}

/// Design parameters (§4.1): the idle-sleep and the poller's per-pass
/// timeout. Grounded on `raya-engine/src/vm/scheduler/scheduler.rs::
/// SchedulerLimits`'s plain-config-struct shape. The worker pool's own
/// concurrency limit is a separate [`WorkerPoolConfig`] (§4.5 names its
/// `setSize(n>0)` distinctly from the scheduler's own parameters), rather
/// than a field folded in here.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub idle_sleep: Duration,
    pub poll_timeout: Duration,
    pub worker_pool: WorkerPoolConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            idle_sleep: Duration::from_micros(500),
            poll_timeout: Duration::from_micros(200),
            worker_pool: WorkerPoolConfig::default(),
        }
    }
}

/// Scheduler statistics (SPEC_FULL §3 supplement), grounded verbatim on
/// `raya-engine/src/vm/scheduler/scheduler.rs::SchedulerStats`.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub active_tasks: usize,
}

/// The single-threaded runtime core. Always held as `Rc<Scheduler>` —
/// nothing here is `Send`/`Sync`, by design (§5: one OS thread owns all of
/// this, so no locks are required).
pub struct Scheduler {
    ready: RefCell<ReadyQueue>,
    main_ready: RefCell<ReadyQueue>,
    tasks: RefCell<FxHashMap<TaskId, Rc<Task>>>,
    poller: RefCell<IoPoller>,
    worker_pool: RefCell<WorkerPool>,
    stats: RefCell<SchedulerStats>,
    config: SchedulerConfig,
}

thread_local! {
    static CURRENT: RefCell<Vec<Rc<Scheduler>>> = RefCell::new(Vec::new());
    static MAIN_ENTRY: std::cell::Cell<bool> = std::cell::Cell::new(false);
    static CURRENT_TASK: RefCell<Vec<Rc<Task>>> = RefCell::new(Vec::new());
}

/// Fetch the task currently being polled by [`Scheduler::resume_one`].
/// Used by leaf futures (`io::net`, `io::stream_io`) that need to hand
/// their owning `Rc<Task>` to the I/O poller when registering a waiter,
/// without every such future threading a task handle through its own
/// constructor.
pub fn current_task() -> Rc<Task> {
    CURRENT_TASK
        .with(|c| c.borrow().last().cloned())
        .expect("corowork: no task is currently being polled on this thread")
}

/// §4.11's main-entry guard: `run_blocking` is the program's root entry
/// point and is not reentrant — a task body that itself called
/// `run_blocking` would deadlock the outer tick loop against its own
/// `thread_wait`, so this is caught up front instead.
struct MainEntryGuard;

impl MainEntryGuard {
    fn acquire() -> Result<MainEntryGuard, Error> {
        let already = MAIN_ENTRY.with(|m| m.replace(true));
        if already {
            return Err(Error::illegal_state(
                "corowork: run_blocking called re-entrantly on this thread",
            ));
        }
        Ok(MainEntryGuard)
    }
}

impl Drop for MainEntryGuard {
    fn drop(&mut self) {
        MAIN_ENTRY.with(|m| m.set(false));
    }
}

/// RAII guard pushing/popping the ambient "current scheduler" stack used by
/// leaf futures (IO waits, channel ops, `delay`/`pause`, `join`) that have
/// no explicit handle to the scheduler driving them. This is the idiomatic
/// Rust analogue of `tokio::runtime::Handle::current()`'s task-local
/// context — not a teacher pattern (the teacher threads `&SharedVmState`
/// explicitly through its interpreter), adopted because arbitrary host-
/// language task bodies calling `stream_read`/`pause`/`delay` can't be
/// made to carry a scheduler parameter through every call site without
/// polluting the whole public API.
struct EnterGuard;

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

/// Fetch the scheduler driving the current tick/task. Panics if called
/// outside any `Scheduler` driving context — a caller bug (an IO primitive
/// or `pause()`/`delay()` invoked without ever being spawned or entered).
pub fn current() -> Rc<Scheduler> {
    CURRENT.with(|c| {
        c.borrow()
            .last()
            .cloned()
            .expect("corowork: no scheduler is currently driving this thread")
    })
}

/// Same as [`current`], but `None` instead of panicking — used by code
/// (like `pause()`) that is a documented no-op outside a task.
pub fn try_current() -> Option<Rc<Scheduler>> {
    CURRENT.with(|c| c.borrow().last().cloned())
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Rc<Scheduler> {
        Rc::new(Scheduler {
            ready: RefCell::new(ReadyQueue::new()),
            main_ready: RefCell::new(ReadyQueue::new()),
            tasks: RefCell::new(FxHashMap::default()),
            poller: RefCell::new(IoPoller::new().expect("corowork: failed to create IoPoller")),
            worker_pool: RefCell::new(WorkerPool::new(config.worker_pool.size)),
            stats: RefCell::new(SchedulerStats::default()),
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }

    fn enter(self: &Rc<Self>) -> EnterGuard {
        CURRENT.with(|c| c.borrow_mut().push(self.clone()));
        EnterGuard
    }

    /// Give access to the I/O poller for registration by leaf futures
    /// (`io::net`, `io::stream_io`).
    pub fn poller(&self) -> &RefCell<IoPoller> {
        &self.poller
    }

    /// Give access to the worker pool, e.g. for `WorkerPool::add`/`set_size`
    /// called directly rather than through [`Scheduler::spawn_blocking`].
    pub fn worker_pool(&self) -> &RefCell<WorkerPool> {
        &self.worker_pool
    }

    pub fn task(&self, id: TaskId) -> Option<Rc<Task>> {
        self.tasks.borrow().get(&id).cloned()
    }

    fn register(&self, task: &Rc<Task>) {
        self.tasks.borrow_mut().insert(task.id(), task.clone());
        let mut stats = self.stats.borrow_mut();
        stats.tasks_spawned += 1;
        stats.active_tasks += 1;
    }

    fn enqueue(&self, task: Rc<Task>) {
        match task.queue_origin() {
            QueueOrigin::Default => self.ready.borrow_mut().push(task),
            QueueOrigin::Main => self.main_ready.borrow_mut().push(task),
        }
    }

    /// `spawn` for `Default`/`Main` (§4.3): the body is a plain cooperative
    /// `Future`, driven directly by this scheduler's ticks.
    pub fn spawn<T, F>(self: &Rc<Self>, dispatcher: Dispatcher, body: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        let origin = match dispatcher {
            Dispatcher::Default => QueueOrigin::Default,
            Dispatcher::Main => QueueOrigin::Main,
            Dispatcher::Io => {
                #[cfg(debug_assertions)]
                eprintln!(
                    "corowork: spawn(Dispatcher::Io, ..) still runs cooperatively on this \
                     thread; use Scheduler::spawn_blocking for true off-thread execution"
                );
                QueueOrigin::Default
            }
        };
        let erased: Pin<Box<dyn Future<Output = Result<Value, Error>>>> =
            Box::pin(async move { body.await.map(boxed) });
        let task = Task::new(erased, None);
        task.set_queue_origin(origin);
        self.register(&task);
        self.enqueue(task.clone());
        JoinHandle::new(task)
    }

    /// `Dispatcher::Io` (§4.3): submit `f` to the worker pool and wrap the
    /// correlation in an ordinary `JoinHandle`, grounded on §4.5's
    /// `addAsync(f)`. `f` runs on a worker thread, so it must be `Send`.
    pub fn spawn_blocking<T, F>(self: &Rc<Self>, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: 'static,
    {
        let computation: Computation = Box::new(move || f().map(boxed));
        let id = self.worker_pool.borrow_mut().add(computation);
        let body: Pin<Box<dyn Future<Output = Result<Value, Error>>>> =
            Box::pin(WorkerJoinFuture { id });
        let task = Task::new(body, None);
        self.register(&task);
        self.enqueue(task.clone());
        JoinHandle::new(task)
    }

    fn dequeue_next(&self) -> Option<Rc<Task>> {
        let mut main = self.main_ready.borrow_mut();
        if let Some(t) = main.pop() {
            return Some(t);
        }
        drop(main);
        self.ready.borrow_mut().pop()
    }

    fn on_task_finished(&self, task: &Rc<Task>) {
        let mut stats = self.stats.borrow_mut();
        stats.tasks_completed += 1;
        stats.active_tasks = stats.active_tasks.saturating_sub(1);
        drop(stats);
        self.tasks.borrow_mut().remove(&task.id());
    }

    fn resume_one(self: &Rc<Self>, task: Rc<Task>) {
        if task.is_timed_out() {
            task.cancel_for_timeout();
            self.on_task_finished(&task);
            return;
        }
        task.mark_started();
        CURRENT_TASK.with(|c| c.borrow_mut().push(task.clone()));
        let polled = task.poll_body();
        CURRENT_TASK.with(|c| {
            c.borrow_mut().pop();
        });
        match polled {
            Poll::Pending => {
                if take_hard_suspend() {
                    // A subsystem (poller/worker pool/channel wait) already
                    // holds the `Rc<Task>` it needs to re-enqueue us later.
                } else {
                    self.enqueue(task);
                }
            }
            Poll::Ready(Ok(v)) => {
                let _ = task.complete(v);
                task.clear_body();
                self.on_task_finished(&task);
            }
            Poll::Ready(Err(e)) => {
                let _ = task.fail(e);
                task.clear_body();
                self.on_task_finished(&task);
            }
        }
    }

    /// One ready-queue step in isolation (§4.11's `pause()`): dequeue and
    /// resume a single task, without touching the poller. Returns whether a
    /// task was actually resumed.
    pub fn ready_queue_step(self: &Rc<Self>) -> bool {
        let _guard = self.enter();
        match self.dequeue_next() {
            Some(task) => {
                self.resume_one(task);
                true
            }
            None => false,
        }
    }

    /// One worker-pool step in isolation (§4.11's `pause()`): collect at
    /// most one finished job's result and wake its waiting task.
    pub fn worker_pool_step(&self) -> bool {
        self.worker_pool.borrow_mut().run_once()
    }

    /// One scheduler tick (§4.1): one poller pass, one worker-pool pass,
    /// one ready-queue step, else idle-sleep. Returns whether any sub-tick
    /// made progress (before any idle-sleep was applied).
    pub fn tick(self: &Rc<Self>) -> bool {
        let _guard = self.enter();
        let mut progressed = false;

        let resumed = self.poller.borrow_mut().poll_once(self.config.poll_timeout);
        if !resumed.is_empty() {
            progressed = true;
            for t in resumed {
                self.enqueue(t);
            }
        }

        if self.worker_pool.borrow_mut().run_once() {
            progressed = true;
        }

        if let Some(task) = self.dequeue_next() {
            progressed = true;
            self.resume_one(task);
        }

        if !progressed {
            std::thread::sleep(self.config.idle_sleep);
        }
        progressed
    }

    /// Whether every subsystem is quiescent: ready queues, worker pool, and
    /// I/O poller all empty (§4.1's `runBlocking`/`threadWait` exit
    /// condition).
    pub fn is_idle(&self) -> bool {
        self.ready.borrow().is_empty()
            && self.main_ready.borrow().is_empty()
            && self.worker_pool.borrow().is_empty()
            && !self.poller.borrow().has_waiters()
    }

    /// `threadWait()` (§4.1): drain all launched work without starting a
    /// new root task. Callable from inside or outside a task.
    pub fn thread_wait(self: &Rc<Self>) {
        while !self.is_idle() {
            self.tick();
        }
    }

    /// `runBlocking(f)` (§4.1): start `f` as the root task, drive the tick
    /// loop to completion, and surface root errors to the caller.
    pub fn run_blocking<T, F>(body: F) -> Result<Rc<T>, Error>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        let _guard = MainEntryGuard::acquire()?;
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let handle = scheduler.spawn(Dispatcher::Default, body);
        scheduler.thread_wait();
        scheduler.join_blocking(&handle)
    }

    /// `join(task)` from **outside** a task (§4.1): loop with an embedded
    /// tick so all subsystems make progress, idle-sleeping when nothing is
    /// happening, until the target reaches a final state.
    pub fn join_blocking<T: 'static>(self: &Rc<Self>, handle: &JoinHandle<T>) -> Result<Rc<T>, Error> {
        loop {
            if let Some(result) = handle.task.join_result() {
                return result.map(|rc| {
                    rc.downcast::<T>()
                        .unwrap_or_else(|_| panic!("corowork: join() result type mismatch"))
                });
            }
            self.tick();
        }
    }

    /// §4.5's after-fork requirement: a worker backend implemented by
    /// forking the process must call this from the child before running
    /// the user computation, clearing every piece of process-wide state so
    /// a forked child doesn't spin on tasks/waiters it inherited from the
    /// parent's snapshot.
    pub fn reset_for_child(&self) {
        *self.ready.borrow_mut() = ReadyQueue::new();
        *self.main_ready.borrow_mut() = ReadyQueue::new();
        self.tasks.borrow_mut().clear();
        *self.worker_pool.borrow_mut() = WorkerPool::new(self.config.worker_pool.size);
        *self.poller.borrow_mut() =
            IoPoller::new().expect("corowork: failed to reconstruct IoPoller after fork reset");
        *self.stats.borrow_mut() = SchedulerStats::default();
    }
}

struct WorkerJoinFuture {
    id: JobId,
}

impl Future for WorkerJoinFuture {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let scheduler = current();
        match scheduler.worker_pool.borrow_mut().take_result(self.id) {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}
