//! Channel (§3, §4.6): a bounded FIFO, capacity 0 being rendezvous.
//!
//! "Channels are external collaborators; for `select` we only depend on
//! their `trySend`/`tryReceive` semantics" (§4.6) — so this is a plain data
//! structure with no coupling to the scheduler. The blocking `send`/
//! `receive` futures are a soft-suspend retry loop over `try_send`/
//! `try_receive` (re-enqueue every tick, no hard registration), grounded on
//! `raya-stdlib/src/stream.rs::forward`'s "try non-blocking first, fall
//! back to the blocking variant" idiom.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::Error;

struct Inner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
    /// Rendezvous bookkeeping (capacity 0): a receiver that found nothing
    /// buffered registers itself here so a concurrent `try_send` can hand
    /// its value straight to a *waiting* receiver rather than an empty
    /// buffer slot that doesn't otherwise exist at capacity 0.
    waiting_receivers: usize,
}

enum SendFail<T> {
    Closed(T),
    Full(T),
}

/// `Channel` (§3's "Channel (abstract)"). Cloning shares the underlying
/// buffer — matches how a channel handle is passed around and closed from
/// multiple tasks.
pub struct Channel<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Channel<T> {
    /// `capacity == 0` is rendezvous: a send only succeeds once a receiver
    /// is already waiting.
    pub fn new(capacity: usize) -> Self {
        Channel {
            inner: Rc::new(RefCell::new(Inner {
                queue: VecDeque::new(),
                capacity,
                closed: false,
                waiting_receivers: 0,
            })),
        }
    }

    fn try_send_inner(&self, value: T) -> Result<(), SendFail<T>> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(SendFail::Closed(value));
        }
        if inner.capacity == 0 {
            if inner.waiting_receivers == 0 {
                return Err(SendFail::Full(value));
            }
            inner.waiting_receivers -= 1;
            inner.queue.push_back(value);
            return Ok(());
        }
        if inner.queue.len() >= inner.capacity {
            return Err(SendFail::Full(value));
        }
        inner.queue.push_back(value);
        Ok(())
    }

    /// `trySend(v) -> bool` (§3): non-blocking; fails when full, closed,
    /// or rendezvous with no waiting receiver.
    pub fn try_send(&self, value: T) -> bool {
        self.try_send_inner(value).is_ok()
    }

    /// `tryReceive() -> value|none` (§3): non-blocking; `None` when empty
    /// or closed+empty. A single call registers at most one rendezvous
    /// waiting-receiver slot; callers that retry in a loop without pairing
    /// each failed attempt with an `unregister` (as `Receive` below does)
    /// should prefer [`Channel::receive`] instead.
    pub fn try_receive(&self) -> Option<T> {
        let mut inner = self.inner.borrow_mut();
        if let Some(v) = inner.queue.pop_front() {
            return Some(v);
        }
        if inner.capacity == 0 && !inner.closed {
            inner.waiting_receivers += 1;
        }
        None
    }

    /// Pop a value if one is already buffered, without touching rendezvous
    /// registration. Used by [`Receive::poll`], which manages registration
    /// itself exactly once per logical `receive().await` rather than once
    /// per re-poll.
    fn dequeue(&self) -> Option<T> {
        self.inner.borrow_mut().queue.pop_front()
    }

    /// Register one rendezvous waiting-receiver slot (capacity 0 only).
    fn register_waiting_receiver(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.capacity == 0 && !inner.closed {
            inner.waiting_receivers += 1;
        }
    }

    /// Undo a prior [`Channel::register_waiting_receiver`] that no sender
    /// ever matched (the `Receive` future was dropped, or the channel
    /// closed, before a value arrived).
    fn unregister_waiting_receiver(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.waiting_receivers > 0 {
            inner.waiting_receivers -= 1;
        }
    }

    /// `send(v)` (§3): blocks (soft-suspends, if called from inside a
    /// task) until capacity is available or the channel closes.
    pub fn send(&self, value: T) -> Send<T> {
        Send {
            channel: self.clone(),
            value: Some(value),
        }
    }

    /// `receive()` (§3): blocks until a value arrives or closed+empty.
    pub fn receive(&self) -> Receive<T> {
        Receive {
            channel: self.clone(),
            registered: false,
        }
    }

    /// `close()` (§3): idempotent; after close, `send` fails, `trySend`
    /// returns false, readers drain remaining values then observe empty.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.borrow();
        if inner.capacity == 0 {
            inner.waiting_receivers == 0
        } else {
            inner.queue.len() >= inner.capacity
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}

/// Future returned by [`Channel::send`]. Soft-suspend retry (§5: a channel
/// `send`/`receive` that cannot complete immediately is an implicit
/// suspension point) — no wake registration, just re-poll every turn.
pub struct Send<T> {
    channel: Channel<T>,
    value: Option<T>,
}

impl<T> Future for Send<T> {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let value = this
            .value
            .take()
            .expect("corowork: Send polled after completion");
        match this.channel.try_send_inner(value) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(SendFail::Closed(_)) => Poll::Ready(Err(Error::ChannelClosed)),
            Err(SendFail::Full(v)) => {
                this.value = Some(v);
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`Channel::receive`]. Soft-suspend retry, like
/// [`Send`] — but on a rendezvous (capacity-0) channel, "retry" must not
/// mean "register as a waiting receiver again on every re-poll": a single
/// logical `receive().await` admits exactly one matching `send`, so
/// `registered` latches the registration to the future's first `Pending`
/// rather than letting it accumulate across ticks.
pub struct Receive<T> {
    channel: Channel<T>,
    registered: bool,
}

impl<T> Future for Receive<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(v) = this.channel.dequeue() {
            // A match consumed the registration (the sender's
            // `try_send_inner` already decremented `waiting_receivers`);
            // don't double-release it in `Drop`.
            this.registered = false;
            return Poll::Ready(Some(v));
        }
        if this.channel.is_closed() {
            return Poll::Ready(None);
        }
        if !this.registered {
            this.channel.register_waiting_receiver();
            this.registered = true;
        }
        Poll::Pending
    }
}

impl<T> Drop for Receive<T> {
    fn drop(&mut self) {
        if self.registered {
            self.channel.unregister_waiting_receiver();
        }
    }
}
