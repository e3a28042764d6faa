//! Conflated state stream (`StateFlow`, §4.10): a single current value plus
//! equality-based conflation, with the same live-collector dispatch shape as
//! [`crate::shared_flow`] but no replay window (the current value itself
//! *is* the replay).
//!
//! `StateFlow` collectors are plain callbacks, the same scope reduction
//! already taken in `shared_flow.rs` — an operator pipeline on a hot
//! collector would need the same `Value`-erasure machinery `flow.rs` builds
//! for cold pipelines, and nothing in the spec's worked scenarios (§8)
//! exercises it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct CollectorHandle<T> {
    id: u64,
    queue: Rc<RefCell<VecDeque<Rc<T>>>>,
}

struct Inner<T> {
    current: Rc<T>,
    extra: usize,
    collectors: Vec<CollectorHandle<T>>,
    next_id: u64,
}

/// `StateFlow` (§3, §4.10). Cloning shares the same current-value cell and
/// collector registry.
pub struct StateFlow<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for StateFlow<T> {
    fn clone(&self) -> Self {
        StateFlow {
            inner: self.inner.clone(),
        }
    }
}

impl<T: PartialEq + 'static> StateFlow<T> {
    /// `extraBufferCapacity` bounds the per-collector pending queue once
    /// `setValue` outruns a slow collector's drain; `0` means "dispatch
    /// immediately, no queueing" (a new value simply overwrites the
    /// collector's backlog down to the newest).
    pub fn new(initial: T, extra_buffer_capacity: usize) -> Self {
        StateFlow {
            inner: Rc::new(RefCell::new(Inner {
                current: Rc::new(initial),
                extra: extra_buffer_capacity,
                collectors: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// `getValue()` (§4.10).
    pub fn get_value(&self) -> Rc<T> {
        self.inner.borrow().current.clone()
    }

    /// `setValue(new)` (§4.10): a no-op when `new == current` (conflation).
    pub fn set_value(&self, new: T) {
        self.set_value_inner(new);
    }

    /// `compareAndSet(expected, new)` (§4.10): atomically (single-threaded,
    /// so trivially) set only if the current value still equals `expected`.
    pub fn compare_and_set(&self, expected: &T, new: T) -> bool {
        let matches = *self.inner.borrow().current == *expected;
        if matches {
            self.set_value_inner(new);
        }
        matches
    }

    /// `update(f)` (§4.10): read-modify-write in terms of [`set_value`].
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.get_value();
        self.set_value(f(&current));
    }

    fn set_value_inner(&self, new: T) -> bool {
        let mut inner = self.inner.borrow_mut();
        if *inner.current == new {
            return false;
        }
        let rc = Rc::new(new);
        inner.current = rc.clone();
        let extra = inner.extra;
        for c in &inner.collectors {
            let mut q = c.queue.borrow_mut();
            q.push_back(rc.clone());
            if extra == 0 {
                while q.len() > 1 {
                    q.pop_front();
                }
            } else {
                while q.len() > extra {
                    q.pop_front();
                }
            }
        }
        true
    }

    /// Register a collector, immediately seeded with the current value
    /// (§4.10's "a new collector immediately receives the current value").
    pub fn collect(&self, sink: impl FnMut(Rc<T>) + 'static) -> StateCollect<T> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let mut queue = VecDeque::new();
        queue.push_back(inner.current.clone());
        let queue = Rc::new(RefCell::new(queue));
        inner.collectors.push(CollectorHandle {
            id,
            queue: queue.clone(),
        });
        drop(inner);
        StateCollect {
            inner: self.inner.clone(),
            id,
            queue,
            sink: Box::new(sink),
        }
    }

    /// `distinctUntilChanged(compare)` (§4.10) with a caller-supplied
    /// comparator, layered over [`collect`] since `setValue` already
    /// conflates by `PartialEq`: this re-filters consecutive duplicates
    /// using `cmp` instead, for callers whose notion of "changed" differs
    /// from derived equality.
    pub fn collect_distinct_by(
        &self,
        cmp: impl Fn(&T, &T) -> bool + 'static,
        mut sink: impl FnMut(Rc<T>) + 'static,
    ) -> StateCollect<T> {
        let last: Rc<RefCell<Option<Rc<T>>>> = Rc::new(RefCell::new(None));
        self.collect(move |v| {
            let mut last = last.borrow_mut();
            let changed = match last.as_ref() {
                Some(prev) => !cmp(prev, &v),
                None => true,
            };
            if changed {
                *last = Some(v.clone());
                sink(v);
            }
        })
    }
}

/// Future returned by [`StateFlow::collect`]. Never completes on its own —
/// a `StateFlow` has no `complete()` (§4.10 carries no terminal state) —
/// so it is driven only for as long as its owning task runs, and is
/// cancelled like any other child task.
pub struct StateCollect<T> {
    inner: Rc<RefCell<Inner<T>>>,
    id: u64,
    queue: Rc<RefCell<VecDeque<Rc<T>>>>,
    sink: Box<dyn FnMut(Rc<T>)>,
}

impl<T: 'static> std::future::Future for StateCollect<T> {
    type Output = Result<(), crate::error::Error>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), crate::error::Error>> {
        let this = self.get_mut();
        loop {
            let next = this.queue.borrow_mut().pop_front();
            match next {
                Some(v) => {
                    let sink = &mut this.sink;
                    let panicked =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(v))).is_err();
                    if panicked {
                        this.inner.borrow_mut().collectors.retain(|c| c.id != this.id);
                        return std::task::Poll::Ready(Ok(()));
                    }
                }
                None => return std::task::Poll::Pending,
            }
        }
    }
}

impl<T> Drop for StateCollect<T> {
    fn drop(&mut self) {
        self.inner.borrow_mut().collectors.retain(|c| c.id != self.id);
    }
}
