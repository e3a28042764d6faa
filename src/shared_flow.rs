//! Hot broadcast stream (`SharedFlow`, §4.9): shared emissions to N
//! collectors, with a replay window plus an extra buffer and an overflow
//! policy.
//!
//! Unlike `Flow`, a `SharedFlow` has real concurrent collectors — each
//! `collect()` call spawns its own drain loop (typically as its own task),
//! so the `Suspend` overflow strategy here genuinely can make progress: a
//! suspended `emit` retries every tick, and the slowest collector's queue
//! actually shrinks as that collector's own task polls. `bufferedCount` in
//! §4.9's "backpressure is triggered only when ... bufferedCount >=
//! totalCapacity" is read here as the slowest *currently registered*
//! collector's undrained backlog, the interpretation that lets backpressure
//! actually recede instead of being permanent once triggered once — recorded
//! as an Open-Question resolution in DESIGN.md.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::backpressure::BackpressureStrategy;
use crate::error::Error;
use crate::suspend::YieldOnce;

struct CollectorHandle<T> {
    id: u64,
    queue: Rc<RefCell<VecDeque<Rc<T>>>>,
}

struct Inner<T> {
    replay_cap: usize,
    extra: usize,
    strategy: BackpressureStrategy,
    replay_cache: VecDeque<Rc<T>>,
    collectors: Vec<CollectorHandle<T>>,
    on_completion: Vec<Box<dyn FnOnce()>>,
    active: bool,
    next_id: u64,
}

impl<T> Inner<T> {
    fn total_cap(&self) -> usize {
        self.replay_cap + self.extra
    }

    fn slowest_backlog(&self) -> usize {
        self.collectors
            .iter()
            .map(|c| c.queue.borrow().len())
            .max()
            .unwrap_or(0)
    }

    /// Append to the replay cache (auto-evicting to `replay_cap`) and to
    /// every live collector's queue (§4.9's "Dispatch to all active
    /// collectors").
    fn push(&mut self, value: Rc<T>) {
        self.replay_cache.push_back(value.clone());
        while self.replay_cache.len() > self.replay_cap {
            self.replay_cache.pop_front();
        }
        for c in &self.collectors {
            c.queue.borrow_mut().push_back(value.clone());
        }
    }

    fn evict_for_drop_oldest(&self, total_cap: usize) {
        for c in &self.collectors {
            if c.queue.borrow().len() >= total_cap {
                c.queue.borrow_mut().pop_front();
            }
        }
    }

    fn remove_collector(&mut self, id: u64) {
        self.collectors.retain(|c| c.id != id);
    }
}

/// `SharedFlow` (§3, §4.9). Cloning shares the same buffer and collector
/// registry — a handle, not a deep copy.
pub struct SharedFlow<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for SharedFlow<T> {
    fn clone(&self) -> Self {
        SharedFlow {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> SharedFlow<T> {
    /// `replay >= 0`, `extraBufferCapacity >= 0`, total capacity = the two
    /// summed (§4.9's construction parameters).
    pub fn new(replay: usize, extra_buffer_capacity: usize, on_buffer_overflow: BackpressureStrategy) -> Self {
        SharedFlow {
            inner: Rc::new(RefCell::new(Inner {
                replay_cap: replay,
                extra: extra_buffer_capacity,
                strategy: on_buffer_overflow,
                replay_cache: VecDeque::new(),
                collectors: Vec::new(),
                on_completion: Vec::new(),
                active: true,
                next_id: 1,
            })),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    pub fn replay_count(&self) -> usize {
        self.inner.borrow().replay_cache.len()
    }

    /// `emit(v)` (§4.9): suspends under the `Suspend` overflow strategy
    /// until another collector's drain frees space; every other strategy
    /// resolves synchronously.
    pub async fn emit(&self, value: T) -> Result<(), Error> {
        let value = Rc::new(value);
        loop {
            let (is_full, strategy, total_cap) = {
                let inner = self.inner.borrow();
                if !inner.active {
                    return Ok(());
                }
                let total_cap = inner.total_cap();
                let full = inner.extra > 0 && inner.slowest_backlog() >= total_cap;
                (full, inner.strategy, total_cap)
            };
            if !is_full {
                self.inner.borrow_mut().push(value);
                return Ok(());
            }
            match strategy {
                BackpressureStrategy::Suspend => {
                    YieldOnce::new().await;
                    continue;
                }
                BackpressureStrategy::DropOldest => {
                    let mut inner = self.inner.borrow_mut();
                    inner.evict_for_drop_oldest(total_cap);
                    inner.push(value);
                    return Ok(());
                }
                BackpressureStrategy::DropLatest => return Ok(()),
                BackpressureStrategy::Error => return Err(Error::BufferOverflow),
            }
        }
    }

    /// `tryEmit(v)` (§4.9): non-blocking. `DropOldest` always succeeds;
    /// `DropLatest` reports success even though the value is discarded;
    /// `Suspend`/`Error` report failure on a full buffer instead of waiting
    /// or raising.
    pub fn try_emit(&self, value: T) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.active {
            return false;
        }
        let total_cap = inner.total_cap();
        let full = inner.extra > 0 && inner.slowest_backlog() >= total_cap;
        if !full {
            inner.push(Rc::new(value));
            return true;
        }
        match inner.strategy {
            BackpressureStrategy::DropOldest => {
                inner.evict_for_drop_oldest(total_cap);
                inner.push(Rc::new(value));
                true
            }
            BackpressureStrategy::DropLatest => true,
            BackpressureStrategy::Suspend | BackpressureStrategy::Error => false,
        }
    }

    /// Register a collector: immediately seeded with the replay slice
    /// (oldest first), then fed live emissions (§4.9's "Collect").
    pub fn collect(&self, sink: impl FnMut(Rc<T>) + 'static) -> SharedCollect<T> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let queue = Rc::new(RefCell::new(inner.replay_cache.clone()));
        inner.collectors.push(CollectorHandle {
            id,
            queue: queue.clone(),
        });
        drop(inner);
        SharedCollect {
            inner: self.inner.clone(),
            id,
            queue,
            sink: Box::new(sink),
        }
    }

    /// Register a callback to run once, when [`SharedFlow::complete`] is
    /// called (or immediately, if already completed).
    pub fn on_completion(&self, f: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if inner.active {
            inner.on_completion.push(Box::new(f));
        } else {
            drop(inner);
            f();
        }
    }

    /// `complete()` (§4.9): mark inactive; any `Suspend`-blocked `emit`
    /// notices on its next retry and returns without emitting (§4.9:
    /// "resume all suspended emitters with a 'not accepted' signal").
    pub fn complete(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.active {
            return;
        }
        inner.active = false;
        let callbacks = std::mem::take(&mut inner.on_completion);
        drop(inner);
        for cb in callbacks {
            cb();
        }
    }
}

/// Future returned by [`SharedFlow::collect`].
pub struct SharedCollect<T> {
    inner: Rc<RefCell<Inner<T>>>,
    id: u64,
    queue: Rc<RefCell<VecDeque<Rc<T>>>>,
    sink: Box<dyn FnMut(Rc<T>)>,
}

impl<T: 'static> std::future::Future for SharedCollect<T> {
    type Output = Result<(), Error>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Error>> {
        let this = self.get_mut();
        loop {
            let next = this.queue.borrow_mut().pop_front();
            match next {
                Some(v) => {
                    let sink = &mut this.sink;
                    let panicked =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(v))).is_err();
                    if panicked {
                        // §4.9: "a collector whose callback throws is removed silently".
                        this.inner.borrow_mut().remove_collector(this.id);
                        return std::task::Poll::Ready(Ok(()));
                    }
                }
                None => {
                    return if this.inner.borrow().active {
                        std::task::Poll::Pending
                    } else {
                        std::task::Poll::Ready(Ok(()))
                    };
                }
            }
        }
    }
}

impl<T> Drop for SharedCollect<T> {
    fn drop(&mut self) {
        self.inner.borrow_mut().remove_collector(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn replay_delivers_last_k_oldest_first() {
        // Scenario 3 (§8): replay=3, extra=0; emit 1..5, then a late
        // collector observes [3,4,5].
        let flow: SharedFlow<i32> = SharedFlow::new(3, 0, BackpressureStrategy::Suspend);
        for v in 1..=5 {
            assert!(flow.try_emit(v));
        }
        let out = Rc::new(StdRefCell::new(Vec::new()));
        let out2 = out.clone();
        let collector = flow.collect(move |v| out2.borrow_mut().push(*v));
        flow.complete();
        Scheduler::run_blocking(async move { collector.await }).unwrap();
        assert_eq!(*out.borrow(), vec![3, 4, 5]);
    }

    #[test]
    fn drop_latest_under_pressure_stops_accepting_past_capacity() {
        // Scenario 4 (§8): replay=1, extra=3, DropLatest; an always-on
        // collector observes [1,2,3,4] out of 1..6.
        let flow: SharedFlow<i32> = SharedFlow::new(1, 3, BackpressureStrategy::DropLatest);
        let out = Rc::new(StdRefCell::new(Vec::new()));
        let out2 = out.clone();
        let collector = flow.collect(move |v| out2.borrow_mut().push(*v));
        for v in 1..=6 {
            assert!(flow.try_emit(v));
        }
        flow.complete();
        Scheduler::run_blocking(async move { collector.await }).unwrap();
        assert_eq!(*out.borrow(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn extra_zero_never_triggers_backpressure() {
        let flow: SharedFlow<i32> = SharedFlow::new(1, 0, BackpressureStrategy::Error);
        let out = Rc::new(StdRefCell::new(Vec::new()));
        let out2 = out.clone();
        let collector = flow.collect(move |v| out2.borrow_mut().push(*v));
        for v in 0..100 {
            assert!(flow.try_emit(v));
        }
        flow.complete();
        Scheduler::run_blocking(async move { collector.await }).unwrap();
        assert_eq!(out.borrow().len(), 100);
    }

    #[test]
    fn dropped_collector_no_longer_counts_toward_backpressure() {
        let flow: SharedFlow<i32> = SharedFlow::new(0, 1, BackpressureStrategy::Error);
        let collector = flow.collect(|_| {});
        drop(collector);
        assert!(flow.try_emit(1));
        assert!(flow.try_emit(2));
    }

    #[test]
    fn on_completion_fires_once() {
        let flow: SharedFlow<i32> = SharedFlow::new(0, 0, BackpressureStrategy::Error);
        let fired = Rc::new(StdRefCell::new(0));
        let fired2 = fired.clone();
        flow.on_completion(move || *fired2.borrow_mut() += 1);
        flow.complete();
        flow.complete();
        assert_eq!(*fired.borrow(), 1);
    }
}
