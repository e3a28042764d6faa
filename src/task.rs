//! Task identity, state machine, and waiter bookkeeping (§3, §4.2).
//!
//! Grounded on `raya-engine/src/vm/scheduler/task.rs::Task` — same shape
//! (id, state, waiters, timing, cancellation flag) generalized from a
//! bytecode-frame body to a `Future`-based one, and from `Arc<Mutex<_>>`
//! cross-thread fields to `Cell`/`RefCell` since the whole core runs on a
//! single scheduler thread (§5: "no locks are required").

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use crate::clock::{elapsed_ms, now_ms};
use crate::error::Error;
use crate::suspend::noop_waker;
use crate::value::Value;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically assigned, process-unique task identifier (§3).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id, for diagnostics and stable hashing.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// The task lifecycle state (§3, §4.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// `true` for `Completed | Failed | Cancelled` (§3 invariant).
    pub fn is_final(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

pub(crate) type TaskBody = Pin<Box<dyn Future<Output = Result<Value, Error>>>>;

type JoinWaiter = Box<dyn FnOnce(Result<Rc<dyn Any>, Error>)>;
type CompletionWaiter = Box<dyn FnOnce(TaskState)>;

/// A unit of cooperative execution (§3's "Task (also called Job)").
pub struct Task {
    id: TaskId,
    name: Option<String>,
    state: Cell<TaskState>,
    body: RefCell<Option<TaskBody>>,
    start_time: Cell<Option<u64>>,
    end_time: Cell<Option<u64>>,
    /// Deadline relative to `start_time`, set by `cancelAfter` (§4.2).
    timeout_ms: Cell<Option<u64>>,
    timed_out: Cell<bool>,
    result: RefCell<Option<Result<Rc<dyn Any>, Error>>>,
    join_waiters: RefCell<Vec<JoinWaiter>>,
    completion_waiters: RefCell<Vec<CompletionWaiter>>,
    /// Which ready queue this task belongs to when re-enqueued after a
    /// soft suspend or an external wakeup (§4.3's `Main` dispatcher runs
    /// its own priority-queue variant of the ready queue).
    queue_origin: Cell<QueueOrigin>,
}

/// Which of the scheduler's two ready queues owns a task (§4.3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueOrigin {
    Default,
    Main,
}

impl Task {
    pub(crate) fn new(body: TaskBody, name: Option<String>) -> Rc<Task> {
        Rc::new(Task {
            id: TaskId::new(),
            name,
            state: Cell::new(TaskState::Pending),
            body: RefCell::new(Some(body)),
            start_time: Cell::new(None),
            end_time: Cell::new(None),
            timeout_ms: Cell::new(None),
            timed_out: Cell::new(false),
            result: RefCell::new(None),
            join_waiters: RefCell::new(Vec::new()),
            completion_waiters: RefCell::new(Vec::new()),
            queue_origin: Cell::new(QueueOrigin::Default),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn queue_origin(&self) -> QueueOrigin {
        self.queue_origin.get()
    }

    pub(crate) fn set_queue_origin(&self, origin: QueueOrigin) {
        self.queue_origin.set(origin);
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn start_time(&self) -> Option<u64> {
        self.start_time.get()
    }

    pub fn end_time(&self) -> Option<u64> {
        self.end_time.get()
    }

    /// `Pending --start--> Running` (§4.2). Idempotent past the first call.
    pub(crate) fn mark_started(&self) {
        if self.state.get() == TaskState::Pending {
            self.state.set(TaskState::Running);
            self.start_time.set(Some(now_ms()));
        }
    }

    /// `cancelAfter(sec)` (§4.2): store a deadline relative to `startTime`.
    pub fn cancel_after(&self, seconds: f64) {
        self.timeout_ms.set(Some((seconds.max(0.0) * 1000.0) as u64));
    }

    /// Checked by the scheduler when dequeuing (§4.2's Timeout section).
    pub fn is_timed_out(&self) -> bool {
        if self.state.get().is_final() {
            return false;
        }
        match (self.timeout_ms.get(), self.start_time.get()) {
            (Some(budget), Some(start)) => elapsed_ms(start) >= budget,
            _ => false,
        }
    }

    /// Poll the task body once. Panics inside the body are caught and
    /// turned into `Error::Panicked` (SPEC_FULL §3 panic isolation) so one
    /// buggy task cannot unwind through `runBlocking`.
    pub(crate) fn poll_body(&self) -> Poll<Result<Value, Error>> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut body_ref = self.body.borrow_mut();
        let fut = body_ref
            .as_mut()
            .expect("corowork: poll_body called on a finished task");
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)))
        {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(Error::Panicked(panic_message(&payload)))),
        }
    }

    pub(crate) fn clear_body(&self) {
        self.body.borrow_mut().take();
    }

    /// `Running --body returns--> Completed` (§4.2). Idempotent on
    /// `Completed`; `IllegalState` from any other non-`Running` state.
    pub(crate) fn complete(&self, value: Value) -> Result<(), Error> {
        match self.state.get() {
            TaskState::Completed => Ok(()),
            TaskState::Running | TaskState::Pending => {
                self.state.set(TaskState::Completed);
                self.end_time.set(Some(now_ms()));
                let rc: Rc<dyn Any> = Rc::from(value);
                *self.result.borrow_mut() = Some(Ok(rc));
                self.fire_join_waiters();
                self.fire_completion_waiters();
                Ok(())
            }
            other => Err(Error::illegal_state(format!(
                "cannot complete task {:?} from state {:?}",
                self.id, other
            ))),
        }
    }

    /// `Running --body throws--> Failed`, or early failure from `Pending`
    /// (§4.2: "body may throw before start completes"). Idempotent on
    /// `Failed`.
    pub(crate) fn fail(&self, error: Error) -> Result<(), Error> {
        match self.state.get() {
            TaskState::Failed => Ok(()),
            TaskState::Running | TaskState::Pending => {
                self.state.set(TaskState::Failed);
                self.end_time.set(Some(now_ms()));
                *self.result.borrow_mut() = Some(Err(error));
                self.fire_join_waiters();
                self.fire_completion_waiters();
                Ok(())
            }
            other => Err(Error::illegal_state(format!(
                "cannot fail task {:?} from state {:?}",
                self.id, other
            ))),
        }
    }

    /// `{Pending,Running} --cancel--> Cancelled` (§4.2). Per §8's testable
    /// properties, idempotent on an already-`Cancelled` task; `IllegalState`
    /// from any other final state.
    pub fn cancel(&self) -> Result<(), Error> {
        match self.state.get() {
            TaskState::Cancelled => Ok(()),
            TaskState::Pending | TaskState::Running => {
                if self.is_timed_out() {
                    self.timed_out.set(true);
                }
                self.state.set(TaskState::Cancelled);
                self.end_time.set(Some(now_ms()));
                self.clear_body();
                self.fire_completion_waiters();
                Ok(())
            }
            other => Err(Error::illegal_state(format!(
                "cannot cancel task {:?} from state {:?}",
                self.id, other
            ))),
        }
    }

    /// Cancel via an expired `cancelAfter` deadline rather than a caller
    /// request; marks `timed_out` so `join()` surfaces `Error::Timeout`.
    pub(crate) fn cancel_for_timeout(&self) {
        self.timed_out.set(true);
        let _ = self.cancel();
    }

    /// The outcome `join()` should report, or `None` while still live.
    /// Unlike `joinWaiters` (Completed/Failed only), this also covers
    /// `Cancelled`, matching §4.2's "join() when the task failed or was
    /// cancelled -> surfaces the corresponding error".
    pub(crate) fn join_result(&self) -> Option<Result<Rc<dyn Any>, Error>> {
        match self.state.get() {
            TaskState::Completed | TaskState::Failed => self.result.borrow().clone(),
            TaskState::Cancelled => Some(Err(if self.timed_out.get() {
                Error::Timeout
            } else {
                Error::illegal_state(format!("task {:?} was cancelled", self.id))
            })),
            _ => None,
        }
    }

    /// `onJoin(cb)` (§4.2): fires only on `Completed | Failed`.
    pub fn on_join(&self, cb: JoinWaiter) -> Result<(), Error> {
        if self.state.get().is_final() {
            return Err(Error::illegal_state("task is already in a final state"));
        }
        self.join_waiters.borrow_mut().push(cb);
        Ok(())
    }

    /// `onCompletion(cb)` (§4.2): fires on any final state.
    pub fn on_completion(&self, cb: CompletionWaiter) -> Result<(), Error> {
        if self.state.get().is_final() {
            return Err(Error::illegal_state("task is already in a final state"));
        }
        self.completion_waiters.borrow_mut().push(cb);
        Ok(())
    }

    fn fire_join_waiters(&self) {
        let waiters: Vec<JoinWaiter> = std::mem::take(&mut *self.join_waiters.borrow_mut());
        if waiters.is_empty() {
            return;
        }
        let result = self.result.borrow().clone();
        if let Some(result) = result {
            for w in waiters {
                w(result.clone());
            }
        }
    }

    fn fire_completion_waiters(&self) {
        let waiters: Vec<CompletionWaiter> =
            std::mem::take(&mut *self.completion_waiters.borrow_mut());
        let state = self.state.get();
        for w in waiters {
            w(state);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish()
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task body panicked with a non-string payload".to_string()
    }
}

/// A handle to a spawned task, typed by its return value (§4.3).
///
/// `join()`'s success case is `Rc<T>` rather than a bare `T`: `joinWaiters`
/// (and repeated `join()` calls) may observe the same completed value more
/// than once, and the task's result is stored once behind type erasure —
/// `Rc` is the natural way to hand that single stored value to many
/// observers without requiring `T: Clone`.
pub struct JoinHandle<T> {
    pub(crate) task: Rc<Task>,
    _marker: PhantomData<T>,
}

impl<T: 'static> JoinHandle<T> {
    pub(crate) fn new(task: Rc<Task>) -> Self {
        JoinHandle {
            task,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_timed_out(&self) -> bool {
        self.task.is_timed_out()
    }

    pub fn cancel_after(&self, seconds: f64) {
        self.task.cancel_after(seconds)
    }

    pub fn cancel(&self) -> Result<(), Error> {
        self.task.cancel()
    }

    pub fn on_join(&self, cb: impl FnOnce(Result<Rc<T>, Error>) + 'static) -> Result<(), Error> {
        self.task.on_join(Box::new(move |res| cb(res.map(downcast_rc::<T>))))
    }

    pub fn on_completion(&self, cb: impl FnOnce(TaskState) + 'static) -> Result<(), Error> {
        self.task.on_completion(Box::new(cb))
    }

    /// The in-fiber join primitive (§4.1): a future that soft-suspends
    /// (re-enqueues, no external registration) until the task reaches a
    /// final state, then resolves with `join_result()`.
    pub fn join(&self) -> Join<T> {
        Join {
            task: self.task.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for JoinHandle<T> {
    fn clone(&self) -> Self {
        JoinHandle {
            task: self.task.clone(),
            _marker: PhantomData,
        }
    }
}

fn downcast_rc<T: 'static>(rc: Rc<dyn Any>) -> Rc<T> {
    rc.downcast::<T>()
        .unwrap_or_else(|_| panic!("corowork: join() result type mismatch"))
}

/// Future returned by [`JoinHandle::join`].
pub struct Join<T> {
    task: Rc<Task>,
    _marker: PhantomData<T>,
}

impl<T: 'static> Future for Join<T> {
    type Output = Result<Rc<T>, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.task.join_result() {
            Some(res) => Poll::Ready(res.map(downcast_rc::<T>)),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::boxed;
    use std::future::ready;

    fn pending_task() -> Rc<Task> {
        Task::new(Box::pin(std::future::pending()), None)
    }

    #[test]
    fn state_transitions_start_complete() {
        let t = pending_task();
        assert_eq!(t.state(), TaskState::Pending);
        t.mark_started();
        assert_eq!(t.state(), TaskState::Running);
        t.complete(boxed(1i32)).unwrap();
        assert_eq!(t.state(), TaskState::Completed);
        assert!(t.end_time().is_some());
    }

    #[test]
    fn complete_is_idempotent_on_completed() {
        let t = pending_task();
        t.mark_started();
        t.complete(boxed(1i32)).unwrap();
        t.complete(boxed(2i32)).unwrap();
    }

    #[test]
    fn complete_from_cancelled_is_illegal_state() {
        let t = pending_task();
        t.cancel().unwrap();
        assert!(t.complete(boxed(1i32)).is_err());
    }

    #[test]
    fn cancel_is_idempotent_on_cancelled_but_not_other_finals() {
        let t = pending_task();
        t.cancel().unwrap();
        t.cancel().unwrap();

        let t2 = pending_task();
        t2.mark_started();
        t2.complete(boxed(1i32)).unwrap();
        assert!(t2.cancel().is_err());
    }

    #[test]
    fn join_waiters_fire_once_in_order_on_completed_only() {
        let t = pending_task();
        t.mark_started();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            t.on_join(Box::new(move |_| log.borrow_mut().push(i))).unwrap();
        }
        t.complete(boxed(7i32)).unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        // Re-registering after final is an error, never fires twice.
        assert!(t
            .on_join(Box::new(|_| panic!("should not fire")))
            .is_err());
    }

    #[test]
    fn completion_waiters_fire_on_cancelled_too() {
        let t = pending_task();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        t.on_completion(Box::new(move |s| {
            assert_eq!(s, TaskState::Cancelled);
            fired2.set(true);
        }))
        .unwrap();
        t.cancel().unwrap();
        assert!(fired.get());
    }

    #[test]
    fn join_handle_join_future_resolves_after_completion() {
        let body: TaskBody = Box::pin(ready(Ok(boxed(42i32))));
        let task = Task::new(body, None);
        task.mark_started();
        let handle: JoinHandle<i32> = JoinHandle::new(task.clone());
        // Body hasn't been polled yet.
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = handle.join();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        if let Poll::Ready(Ok(v)) = task.poll_body() {
            task.complete(v).unwrap();
        }
        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(Ok(rc)) => assert_eq!(*rc, 42),
            other => panic!("expected ready(42), got {:?}", other.is_ready()),
        }
    }

    #[test]
    fn join_result_reports_timeout_for_timed_out_cancellation() {
        let t = pending_task();
        t.mark_started();
        t.cancel_after(0.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(t.is_timed_out());
        t.cancel_for_timeout();
        match t.join_result() {
            Some(Err(Error::Timeout)) => {}
            other => panic!("expected Timeout, got {:?}", other.is_some()),
        }
    }
}
