//! Cold stream (`Flow`, §3, §4.8): per-collector execution over an operator
//! pipeline, with an optional `buffer` operator providing backpressure.
//!
//! "A cold stream is a function from 'collector callback' to 'an execution'.
//! Each `collect()` runs the source anew" (§4.8). The source is modeled as an
//! `async` closure that calls `Emitter::emit` once per value; `emit` writes
//! into a shared slot and performs exactly one [`YieldOnce`](crate::suspend::YieldOnce)
//! suspension, which is the resume-with-value edge case §4.8 calls out: the
//! [`Collect`] driver reads that slot every time the source future reports
//! `Pending`, so the first value is consumed exactly like any later one —
//! there is no separate "start vs resume" path to get wrong.
//!
//! Per §3's "Dynamic dispatch via tagged operator entries... best modeled as
//! a sum type of operator variants", the pipeline is `Vec<OpTemplate>`, an
//! immutable, clonable (`Rc`-backed) sequence built by the `.map()`/
//! `.filter()`/... builder methods; `Flow<T>` stays monomorphic at its
//! public edges even though intermediate stages change type, by routing
//! through [`crate::value::Value`] internally (grounded on the same erasure
//! pattern `value.rs` uses for task results).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::backpressure::BackpressureStrategy;
use crate::error::Error;
use crate::suspend::YieldOnce;
use crate::value::{boxed, downcast, downcast_ref, Value};

type ErasedFuture = Pin<Box<dyn Future<Output = Result<(), Error>>>>;

/// Handle a source closure uses to yield a value to the collector (§4.8).
#[derive(Clone)]
pub struct Emitter {
    slot: Rc<RefCell<Option<Value>>>,
}

impl Emitter {
    /// Suspend with `value` as the emission payload; resumes once the
    /// [`Collect`] driver has consumed it from the slot.
    pub async fn emit(&self, value: Value) {
        *self.slot.borrow_mut() = Some(value);
        YieldOnce::new().await;
    }
}

enum OpTemplate {
    Map(Rc<dyn Fn(Value) -> Value>),
    Filter(Rc<dyn Fn(&Value) -> bool>),
    OnEach(Rc<dyn Fn(&Value)>),
    Take(usize),
    Skip(usize),
    FlatMap(Rc<dyn Fn(Value) -> Option<Value>>),
    Catch(Rc<dyn Fn(&Error) -> Option<Value>>),
    OnCompletion(Rc<dyn Fn(Option<&Error>)>),
    Buffer(usize, BackpressureStrategy),
    DistinctUntilChanged {
        cmp: Rc<dyn Fn(&Value, &Value) -> bool>,
        clone: Rc<dyn Fn(&Value) -> Value>,
    },
}

enum OpState {
    Take(usize),
    Skip(usize),
    Buffer(VecDeque<Value>),
    DistinctUntilChanged(Option<Value>),
    None,
}

impl OpTemplate {
    fn fresh_state(&self) -> OpState {
        match self {
            OpTemplate::Take(n) => OpState::Take(*n),
            OpTemplate::Skip(n) => OpState::Skip(*n),
            OpTemplate::Buffer(..) => OpState::Buffer(VecDeque::new()),
            OpTemplate::DistinctUntilChanged { .. } => OpState::DistinctUntilChanged(None),
            _ => OpState::None,
        }
    }
}

/// Outcome of pushing one value through the pipeline from some starting
/// index (§4.8's "per-value pipeline evaluation").
enum Outcome {
    /// The value (if any) was handled; keep pulling from the source.
    Continue,
    /// A `take` operator has let through its full count; §4.8: "also sets
    /// the pipeline's `isCompleted` flag" — the whole flow stops here.
    TakeExhausted,
}

fn process(
    ops: &[OpTemplate],
    state: &[RefCell<OpState>],
    idx: usize,
    value: Value,
    sink: &mut dyn FnMut(Value),
) -> Result<Outcome, Error> {
    if idx == ops.len() {
        sink(value);
        return Ok(Outcome::Continue);
    }
    match &ops[idx] {
        OpTemplate::Map(f) => process(ops, state, idx + 1, (**f)(value), sink),
        OpTemplate::Filter(f) => {
            if (**f)(&value) {
                process(ops, state, idx + 1, value, sink)
            } else {
                Ok(Outcome::Continue)
            }
        }
        OpTemplate::OnEach(f) => {
            (**f)(&value);
            process(ops, state, idx + 1, value, sink)
        }
        OpTemplate::Take(_) => {
            let (exhausted_now, already_done) = {
                let mut st = state[idx].borrow_mut();
                match &mut *st {
                    OpState::Take(remaining) => {
                        if *remaining == 0 {
                            (false, true)
                        } else {
                            *remaining -= 1;
                            (*remaining == 0, false)
                        }
                    }
                    _ => unreachable!("corowork: Take op without Take state"),
                }
            };
            if already_done {
                return Ok(Outcome::TakeExhausted);
            }
            let outcome = process(ops, state, idx + 1, value, sink)?;
            if exhausted_now {
                Ok(Outcome::TakeExhausted)
            } else {
                Ok(outcome)
            }
        }
        OpTemplate::Skip(_) => {
            let should_skip = {
                let mut st = state[idx].borrow_mut();
                match &mut *st {
                    OpState::Skip(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    OpState::Skip(_) => false,
                    _ => unreachable!("corowork: Skip op without Skip state"),
                }
            };
            if should_skip {
                Ok(Outcome::Continue)
            } else {
                process(ops, state, idx + 1, value, sink)
            }
        }
        OpTemplate::FlatMap(f) => match (**f)(value) {
            Some(substituted) => process(ops, state, idx + 1, substituted, sink),
            None => Ok(Outcome::Continue),
        },
        OpTemplate::DistinctUntilChanged { cmp, clone } => {
            let is_dup = {
                let st = state[idx].borrow();
                match &*st {
                    OpState::DistinctUntilChanged(Some(last)) => (**cmp)(last, &value),
                    _ => false,
                }
            };
            if is_dup {
                return Ok(Outcome::Continue);
            }
            *state[idx].borrow_mut() = OpState::DistinctUntilChanged(Some((**clone)(&value)));
            process(ops, state, idx + 1, value, sink)
        }
        OpTemplate::Buffer(capacity, strategy) => {
            drain_buffer(ops, state, idx, sink)?;
            let mut st = state[idx].borrow_mut();
            let ring = match &mut *st {
                OpState::Buffer(ring) => ring,
                _ => unreachable!("corowork: Buffer op without Buffer state"),
            };
            if ring.len() < *capacity {
                ring.push_back(value);
                return Ok(Outcome::Continue);
            }
            match strategy {
                BackpressureStrategy::DropOldest => {
                    ring.pop_front();
                    ring.push_back(value);
                    Ok(Outcome::Continue)
                }
                BackpressureStrategy::DropLatest => Ok(Outcome::Continue),
                BackpressureStrategy::Error => Err(Error::BufferOverflow),
                BackpressureStrategy::Suspend => {
                    // §4.8: "after a bounded number of yields with no
                    // progress, fall back to DropOldest to avoid deadlock."
                    // Here, step 1 (drain_buffer, above) already ran
                    // synchronously right before this check, in the same
                    // `process()` call — there is no concurrent drainer to
                    // yield to within one synchronous `collect()`, so every
                    // retry would observe the identical full buffer. The
                    // bounded wait collapses to zero useful retries; this
                    // degrades to DropOldest immediately rather than
                    // looping a fixed number of times to the same outcome.
                    ring.pop_front();
                    ring.push_back(value);
                    Ok(Outcome::Continue)
                }
            }
        }
        OpTemplate::Catch(_) | OpTemplate::OnCompletion(_) => {
            process(ops, state, idx + 1, value, sink)
        }
    }
}

/// Drain every value currently sitting in the buffer at `idx` through the
/// rest of the pipeline (§4.8's buffer step 1), in FIFO order.
fn drain_buffer(
    ops: &[OpTemplate],
    state: &[RefCell<OpState>],
    idx: usize,
    sink: &mut dyn FnMut(Value),
) -> Result<(), Error> {
    loop {
        let next = {
            let mut st = state[idx].borrow_mut();
            match &mut *st {
                OpState::Buffer(ring) => ring.pop_front(),
                _ => unreachable!("corowork: Buffer op without Buffer state"),
            }
        };
        match next {
            Some(v) => {
                process(ops, state, idx + 1, v, sink)?;
            }
            None => return Ok(()),
        }
    }
}

/// Flush every buffer left with residual content, in pipeline order,
/// repeating until a full pass leaves nothing behind — a later buffer can
/// receive fresh values while an earlier one drains into it (§4.8: "any
/// remaining buffered values are drained before invoking `onCompletion`").
fn flush_all_buffers(ops: &[OpTemplate], state: &[RefCell<OpState>], sink: &mut dyn FnMut(Value)) {
    for _pass in 0..=ops.len() {
        let mut any = false;
        for (idx, op) in ops.iter().enumerate() {
            if matches!(op, OpTemplate::Buffer(..)) {
                let had_content = !matches!(&*state[idx].borrow(), OpState::Buffer(r) if r.is_empty());
                if had_content {
                    any = true;
                }
                let _ = drain_buffer(ops, state, idx, sink);
            }
        }
        if !any {
            break;
        }
    }
}

fn fire_on_completion(ops: &[OpTemplate], error: Option<&Error>) {
    for op in ops {
        if let OpTemplate::OnCompletion(f) = op {
            (**f)(error);
        }
    }
}

/// Try every `catch` operator in registration order; the first whose
/// closure returns `Some(recovery)` gets to emit one last value (routed
/// through the remaining pipeline from its own position) before the flow
/// ends (§7: "routed to the first `catch` operator that accepts them").
fn try_catch(
    ops: &[OpTemplate],
    state: &[RefCell<OpState>],
    error: &Error,
    sink: &mut dyn FnMut(Value),
) -> bool {
    for (idx, op) in ops.iter().enumerate() {
        if let OpTemplate::Catch(f) = op {
            if let Some(recovered) = (**f)(error) {
                let _ = process(ops, state, idx + 1, recovered, sink);
                return true;
            }
        }
    }
    false
}

/// A cold stream (§3, §4.8). `T` is the type `collect()` ultimately hands
/// the caller; the builder methods below thread `Value` erasure through
/// intermediate stages so `map`/`flatMap` can change the item type freely.
pub struct Flow<T> {
    source: Rc<dyn Fn(Emitter) -> ErasedFuture>,
    ops: Rc<Vec<OpTemplate>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow {
            source: self.source.clone(),
            ops: self.ops.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Flow<T> {
    /// Build a flow from an arbitrary source closure; the closure receives
    /// an [`Emitter`] and returns the future driving emission (§4.8).
    pub fn from_source<F, Fut>(source: F) -> Flow<T>
    where
        F: Fn(Emitter) -> Fut + 'static,
        Fut: Future<Output = Result<(), Error>> + 'static,
    {
        Flow {
            source: Rc::new(move |emitter| -> ErasedFuture { Box::pin(source(emitter)) }),
            ops: Rc::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    /// `flowOf(items...)` — emit a fixed, pre-materialized sequence.
    pub fn from_iter<I>(items: I) -> Flow<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
        T: Clone,
    {
        let items: Rc<Vec<T>> = Rc::new(items.into_iter().collect());
        Flow::from_source(move |emitter| {
            let items = items.clone();
            async move {
                for item in items.iter() {
                    emitter.emit(boxed(item.clone())).await;
                }
                Ok(())
            }
        })
    }

    fn with_op(&self, op: OpTemplate) -> Self {
        let mut ops = (*self.ops).clone();
        ops.push(op);
        Flow {
            source: self.source.clone(),
            ops: Rc::new(ops),
            _marker: PhantomData,
        }
    }

    /// `map` (§4.8): each operator call returns a *new* pipeline; `self`'s
    /// own ops are unaffected.
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Flow<U> {
        let op = OpTemplate::Map(Rc::new(move |v: Value| boxed(f(downcast::<T>(v)))));
        let mut ops = (*self.ops).clone();
        ops.push(op);
        Flow {
            source: self.source.clone(),
            ops: Rc::new(ops),
            _marker: PhantomData,
        }
    }

    pub fn filter(&self, f: impl Fn(&T) -> bool + 'static) -> Flow<T> {
        self.with_op(OpTemplate::Filter(Rc::new(move |v: &Value| {
            f(downcast_ref::<T>(v))
        })))
    }

    pub fn on_each(&self, f: impl Fn(&T) + 'static) -> Flow<T> {
        self.with_op(OpTemplate::OnEach(Rc::new(move |v: &Value| {
            f(downcast_ref::<T>(v))
        })))
    }

    /// `take(n)` (§4.8). `n == 0` yields nothing and completes immediately.
    pub fn take(&self, n: usize) -> Flow<T> {
        self.with_op(OpTemplate::Take(n))
    }

    pub fn skip(&self, n: usize) -> Flow<T> {
        self.with_op(OpTemplate::Skip(n))
    }

    /// `flatMap` (§4.8, §9): substitutes the current value with the first
    /// value `f` produces, suppressing later values of the conceptual
    /// sub-stream — the one-value behavior §9 flags as an open question,
    /// preserved here rather than redesigned into a concat-map.
    pub fn flat_map<U: 'static>(&self, f: impl Fn(T) -> Option<U> + 'static) -> Flow<U> {
        let op = OpTemplate::FlatMap(Rc::new(move |v: Value| {
            f(downcast::<T>(v)).map(boxed)
        }));
        let mut ops = (*self.ops).clone();
        ops.push(op);
        Flow {
            source: self.source.clone(),
            ops: Rc::new(ops),
            _marker: PhantomData,
        }
    }

    /// `catch` (§4.8, §7): a recovery closure producing one last value to
    /// emit in place of the terminating error.
    pub fn catch(&self, f: impl Fn(&Error) -> Option<T> + 'static) -> Flow<T> {
        self.with_op(OpTemplate::Catch(Rc::new(move |e: &Error| {
            f(e).map(boxed)
        })))
    }

    /// `onCompletion` (§4.8, §7): always runs, receiving the terminating
    /// error (or `None` on success).
    pub fn on_completion(&self, f: impl Fn(Option<&Error>) + 'static) -> Flow<T> {
        self.with_op(OpTemplate::OnCompletion(Rc::new(f)))
    }

    /// `buffer(capacity, strategy)` (§4.8). `capacity <= 0` is
    /// `InvalidArgument` (§8's boundary behaviors).
    pub fn buffer(&self, capacity: i64, strategy: BackpressureStrategy) -> Result<Flow<T>, Error> {
        if capacity <= 0 {
            return Err(Error::invalid_argument(
                "buffer capacity must be a positive integer",
            ));
        }
        Ok(self.with_op(OpTemplate::Buffer(capacity as usize, strategy)))
    }

    /// `distinctUntilChanged` with the default (`PartialEq`) comparator
    /// (§4.10 cross-reference).
    pub fn distinct_until_changed(&self) -> Flow<T>
    where
        T: PartialEq + Clone,
    {
        self.distinct_until_changed_by(|a, b| a == b)
    }

    pub fn distinct_until_changed_by(&self, cmp: impl Fn(&T, &T) -> bool + 'static) -> Flow<T>
    where
        T: Clone,
    {
        self.with_op(OpTemplate::DistinctUntilChanged {
            cmp: Rc::new(move |a: &Value, b: &Value| cmp(downcast_ref::<T>(a), downcast_ref::<T>(b))),
            clone: Rc::new(|v: &Value| boxed(downcast_ref::<T>(v).clone())),
        })
    }

    /// `collect(callback)` (§4.8): run the source anew and push every
    /// emission through the operator pipeline to `on_value`.
    pub fn collect<F>(&self, on_value: F) -> Collect<T, F>
    where
        F: FnMut(T),
    {
        let slot = Rc::new(RefCell::new(None));
        let emitter = Emitter { slot: slot.clone() };
        let state: Vec<RefCell<OpState>> = self.ops.iter().map(|op| RefCell::new(op.fresh_state())).collect();
        Collect {
            source_fut: (*self.source)(emitter),
            slot,
            ops: self.ops.clone(),
            state,
            sink: on_value,
            finished: false,
            _marker: PhantomData,
        }
    }
}

/// Future returned by [`Flow::collect`].
pub struct Collect<T, F> {
    source_fut: ErasedFuture,
    slot: Rc<RefCell<Option<Value>>>,
    ops: Rc<Vec<OpTemplate>>,
    state: Vec<RefCell<OpState>>,
    sink: F,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static, F: FnMut(T)> Collect<T, F> {
    fn sink_fn(sink: &mut F) -> impl FnMut(Value) + '_ {
        move |v: Value| sink(downcast::<T>(v))
    }

    fn finish(&mut self, cx_result: Result<(), Error>) -> Poll<Result<(), Error>> {
        self.finished = true;
        match cx_result {
            Ok(()) => {
                {
                    let mut sink = Self::sink_fn(&mut self.sink);
                    flush_all_buffers(&self.ops, &self.state, &mut sink);
                }
                fire_on_completion(&self.ops, None);
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                let recovered = {
                    let mut sink = Self::sink_fn(&mut self.sink);
                    try_catch(&self.ops, &self.state, &e, &mut sink)
                };
                if recovered {
                    {
                        let mut sink = Self::sink_fn(&mut self.sink);
                        flush_all_buffers(&self.ops, &self.state, &mut sink);
                    }
                    fire_on_completion(&self.ops, None);
                    Poll::Ready(Ok(()))
                } else {
                    fire_on_completion(&self.ops, Some(&e));
                    Poll::Ready(Err(e))
                }
            }
        }
    }
}

impl<T: 'static, F: FnMut(T)> Future for Collect<T, F> {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Ok(()));
        }
        loop {
            match this.source_fut.as_mut().poll(cx) {
                Poll::Pending => {
                    let maybe_value = this.slot.borrow_mut().take();
                    match maybe_value {
                        Some(v) => {
                            let outcome = {
                                let mut sink = Self::sink_fn(&mut this.sink);
                                process(&this.ops, &this.state, 0, v, &mut sink)
                            };
                            match outcome {
                                Ok(Outcome::Continue) => continue,
                                Ok(Outcome::TakeExhausted) => return this.finish(Ok(())),
                                Err(e) => return this.finish(Err(e)),
                            }
                        }
                        None => return Poll::Pending,
                    }
                }
                Poll::Ready(result) => return this.finish(result),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::cell::RefCell as StdRefCell;

    fn collect_all<T: 'static + std::fmt::Debug>(flow: &Flow<T>) -> Vec<T> {
        let owned = flow.clone();
        let out = Rc::new(StdRefCell::new(Vec::new()));
        let out2 = out.clone();
        Scheduler::run_blocking(async move {
            owned.collect(move |v| out2.borrow_mut().push(v)).await?;
            Ok::<(), Error>(())
        })
        .unwrap();
        Rc::try_unwrap(out).unwrap().into_inner()
    }

    #[test]
    fn map_filter_take_skip_compose() {
        let flow: Flow<i32> = Flow::from_iter(1..=10);
        let flow = flow.map(|v| v * 10).skip(2).take(3);
        assert_eq!(collect_all(&flow), vec![30, 40, 50]);
    }

    #[test]
    fn take_zero_yields_nothing() {
        let flow: Flow<i32> = Flow::from_iter([1, 2, 3]);
        let flow = flow.take(0);
        assert_eq!(collect_all(&flow), Vec::<i32>::new());
    }

    #[test]
    fn filter_suppresses_values() {
        let flow: Flow<i32> = Flow::from_iter(1..=6);
        let flow = flow.filter(|v| v % 2 == 0);
        assert_eq!(collect_all(&flow), vec![2, 4, 6]);
    }

    #[test]
    fn on_each_observes_without_changing_values() {
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let flow: Flow<i32> = Flow::from_iter([1, 2, 3]);
        let flow = flow.on_each(move |v| seen2.borrow_mut().push(*v));
        assert_eq!(collect_all(&flow), vec![1, 2, 3]);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn flat_map_keeps_only_first_substream_value() {
        let flow: Flow<i32> = Flow::from_iter([1, 2, 3]);
        let flow = flow.flat_map(|v| if v == 2 { None } else { Some(v * 100) });
        assert_eq!(collect_all(&flow), vec![100, 300]);
    }

    #[test]
    fn distinct_until_changed_drops_consecutive_duplicates() {
        let flow: Flow<i32> = Flow::from_iter([1, 1, 2, 2, 2, 1]);
        let flow = flow.distinct_until_changed();
        assert_eq!(collect_all(&flow), vec![1, 2, 1]);
    }

    #[test]
    fn buffer_drop_oldest_still_delivers_everything_for_a_synchronous_sink() {
        // Scenario 5 (§8): a synchronous collector drains on every offer, so
        // all values survive even through a small DropOldest buffer — only
        // the tail stays buffered until the final flush.
        let flow: Flow<i32> = Flow::from_iter(1..=10);
        let flow = flow.map(|v| v * 10).buffer(3, BackpressureStrategy::DropOldest).unwrap();
        assert_eq!(
            collect_all(&flow),
            (1..=10).map(|v| v * 10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn buffer_rejects_non_positive_capacity() {
        let flow: Flow<i32> = Flow::from_iter([1]);
        assert!(flow.buffer(0, BackpressureStrategy::Error).is_err());
        assert!(flow.buffer(-1, BackpressureStrategy::Error).is_err());
    }

    #[test]
    fn on_completion_fires_once_after_all_values() {
        let fired = Rc::new(StdRefCell::new(false));
        let fired2 = fired.clone();
        let flow: Flow<i32> = Flow::from_iter([1, 2, 3]);
        let flow = flow.on_completion(move |err| {
            assert!(err.is_none());
            *fired2.borrow_mut() = true;
        });
        collect_all(&flow);
        assert!(*fired.borrow());
    }

    #[test]
    fn catch_recovers_with_one_last_value() {
        let flow: Flow<i32> = Flow::from_source(|emitter| async move {
            emitter.emit(boxed(1i32)).await;
            Err(Error::invalid_argument("boom"))
        });
        let flow = flow.catch(|_e| Some(-1));
        assert_eq!(collect_all(&flow), vec![1, -1]);
    }

    #[test]
    fn uncaught_error_surfaces_from_collect() {
        let flow: Flow<i32> = Flow::from_source(|_emitter| async move {
            Err(Error::invalid_argument("boom"))
        });
        let out = Rc::new(StdRefCell::new(Vec::new()));
        let out2 = out.clone();
        let result = Scheduler::run_blocking(async move {
            flow.collect(move |v| out2.borrow_mut().push(v)).await
        });
        assert!(result.is_err());
    }
}
