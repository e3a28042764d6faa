//! The suspend primitive.
//!
//! `spec.md`'s Design Notes call out that the one thing a target language
//! without stackful coroutines must still honor is the *resume-with-value*
//! protocol: a task body suspends by yielding a value, and is later resumed
//! with another value fed back in. `std::future::Future` already models
//! exactly this (a leaf future returns `Poll::Pending`, and is later polled
//! again), so task bodies here are plain `Future`s rather than a bespoke
//! generator type.
//!
//! What `Future`/`Waker` does *not* give us for free is the distinction the
//! scheduler (§4.1) needs between two kinds of "not ready yet":
//!
//! - **soft** — the task voluntarily yielded (`pause`, `delay`'s busy-check
//!   loop, a channel operation retrying) and should simply be re-enqueued at
//!   the back of the ready queue for the next round-robin step.
//! - **hard** — the task registered itself with an external subsystem (the
//!   I/O poller) and must be removed from the ready queue entirely; only
//!   that subsystem may put it back.
//!
//! Because the whole core runs on one thread (§5), a thread-local flag set
//! by a leaf future immediately before it returns `Pending`, and read by the
//! scheduler immediately after polling, is enough to carry that one bit of
//! information without threading it through every `Future::poll` signature.

use std::cell::Cell;

thread_local! {
    static HARD_SUSPEND: Cell<bool> = Cell::new(false);
}

/// Mark the in-flight `poll` as a hard suspend (registered with an external
/// subsystem). Must be called by a leaf future immediately before returning
/// `Poll::Pending` from that leaf.
pub fn mark_hard_suspend() {
    HARD_SUSPEND.with(|c| c.set(true));
}

/// Consume and clear the hard-suspend flag. Returns `true` if a leaf future
/// called [`mark_hard_suspend`] during the most recent `poll`.
pub(crate) fn take_hard_suspend() -> bool {
    HARD_SUSPEND.with(|c| c.replace(false))
}

/// A future that is `Pending` exactly once, then `Ready`. This is the
/// primitive behind `pause()`: a single voluntary yield back to the
/// scheduler, after which the task is re-enqueued (soft suspend) and
/// resumed on its next turn.
pub struct YieldOnce {
    yielded: bool,
}

impl YieldOnce {
    /// Construct a new single-shot yield point.
    pub fn new() -> Self {
        Self { yielded: false }
    }
}

impl Default for YieldOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl std::future::Future for YieldOnce {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            std::task::Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    }
}

/// A no-op waker used to drive task bodies. Real resumption is never driven
/// by `Waker::wake` here — it is driven by the scheduler explicitly
/// re-enqueueing task ids (soft suspend) or by the I/O poller / worker pool
/// explicitly re-enqueueing a hard-suspended task's id once its condition is
/// satisfied (§4.1, §4.4, §4.5). The waker still needs to exist because
/// `Future::poll` requires a `Context`.
pub fn noop_waker() -> std::task::Waker {
    struct NoopWake;
    impl std::task::Wake for NoopWake {
        fn wake(self: std::sync::Arc<Self>) {}
        fn wake_by_ref(self: &std::sync::Arc<Self>) {}
    }
    std::task::Waker::from(std::sync::Arc::new(NoopWake))
}
