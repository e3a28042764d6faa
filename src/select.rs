//! `Select` (§3, §4.6): multiway channel choice with an optional default,
//! falling back to a uniformly random blocking case. Built entirely on
//! [`Channel`]'s `trySend`/`tryReceive` interface, per §4.6's "for select we
//! only depend on their trySend/tryReceive semantics" — grounded on the
//! same try-first idiom as `channel.rs` (`raya-stdlib/src/stream.rs`).
//!
//! Each case is erased behind `Box<dyn CaseOp<R>>` so a single `Select<R>`
//! can mix cases over channels of different item types, unified only by
//! the action's return type `R`.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use rand::Rng;

use crate::channel::Channel;
use crate::error::Error;

trait CaseOp<R> {
    /// Attempt the case's non-blocking operation once. `Err` hands the
    /// case back unconsumed so it can be retried or, failing all cases,
    /// picked for the blocking fallback.
    fn try_once(self: Box<Self>) -> Result<R, Box<dyn CaseOp<R>>>;

    /// The blocking fallback (§4.6 step 3): perform the blocking send or
    /// receive, then run the action.
    fn block(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<R, Error>>>>;
}

struct SendCase<T, R, F> {
    channel: Channel<T>,
    value: T,
    action: F,
}

impl<T, R, F> CaseOp<R> for SendCase<T, R, F>
where
    T: Clone + 'static,
    F: FnOnce(T) -> R + 'static,
{
    fn try_once(self: Box<Self>) -> Result<R, Box<dyn CaseOp<R>>> {
        let SendCase { channel, value, action } = *self;
        if channel.try_send(value.clone()) {
            Ok(action(value))
        } else {
            Err(Box::new(SendCase { channel, value, action }))
        }
    }

    fn block(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<R, Error>>>> {
        let SendCase { channel, value, action } = *self;
        Box::pin(async move {
            channel.send(value.clone()).await?;
            Ok(action(value))
        })
    }
}

struct ReceiveCase<T, R, F> {
    channel: Channel<T>,
    action: F,
    _marker: PhantomData<R>,
}

impl<T, R, F> CaseOp<R> for ReceiveCase<T, R, F>
where
    T: 'static,
    F: FnOnce(T) -> R + 'static,
{
    fn try_once(self: Box<Self>) -> Result<R, Box<dyn CaseOp<R>>> {
        let ReceiveCase { channel, action, _marker } = *self;
        match channel.try_receive() {
            Some(v) => Ok(action(v)),
            None => Err(Box::new(ReceiveCase { channel, action, _marker })),
        }
    }

    fn block(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<R, Error>>>> {
        let ReceiveCase { channel, action, .. } = *self;
        Box::pin(async move {
            match channel.receive().await {
                Some(v) => Ok(action(v)),
                None => Err(Error::ChannelClosed),
            }
        })
    }
}

/// The builder (§4.6): an ordered sequence of cases, plus an optional
/// default. Cases are consumed by [`Select::execute`].
pub struct Select<R> {
    cases: Vec<Box<dyn CaseOp<R>>>,
    default: Option<R>,
}

impl<R: 'static> Select<R> {
    pub fn new() -> Self {
        Select {
            cases: Vec::new(),
            default: None,
        }
    }

    /// Register a send case: `trySend(value)` on `channel`, running
    /// `action(value)` on success. `T: Clone` because a failed `trySend`
    /// must hand the original value back for the next attempt while the
    /// eventual action (on success) still receives "the exchanged value"
    /// per §4.6.
    pub fn with_send<T>(
        mut self,
        channel: &Channel<T>,
        value: T,
        action: impl FnOnce(T) -> R + 'static,
    ) -> Self
    where
        T: Clone + 'static,
    {
        self.cases.push(Box::new(SendCase {
            channel: channel.clone(),
            value,
            action,
        }));
        self
    }

    /// Register a receive case: `tryReceive()` on `channel`, running
    /// `action(value)` on success.
    pub fn with_receive<T>(mut self, channel: &Channel<T>, action: impl FnOnce(T) -> R + 'static) -> Self
    where
        T: 'static,
    {
        self.cases.push(Box::new(ReceiveCase {
            channel: channel.clone(),
            action,
            _marker: PhantomData,
        }));
        self
    }

    pub fn or_default(mut self, value: R) -> Self {
        self.default = Some(value);
        self
    }

    /// `execute()` (§4.6): try every case in registration order; on the
    /// first success, run its action. If none succeed, return the default
    /// if registered; otherwise pick a uniformly random case and perform
    /// its blocking operation. Deliberately bypasses fairness in that
    /// fallback (§4.6, §9 leaves open replacing it with a cooperative wait
    /// over all cases).
    pub fn execute(self) -> Pin<Box<dyn Future<Output = Result<R, Error>>>> {
        Box::pin(async move {
            let mut remaining = Vec::with_capacity(self.cases.len());
            for case in self.cases {
                match case.try_once() {
                    Ok(r) => return Ok(r),
                    Err(case) => remaining.push(case),
                }
            }

            if let Some(default) = self.default {
                return Ok(default);
            }

            if remaining.is_empty() {
                return Err(Error::invalid_argument("select() requires at least one case"));
            }

            let idx = rand::thread_rng().gen_range(0..remaining.len());
            let chosen = remaining.swap_remove(idx);
            chosen.block().await
        })
    }
}

impl<R: 'static> Default for Select<R> {
    fn default() -> Self {
        Select::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;

    #[test]
    fn first_ready_case_wins_in_registration_order() {
        let a: Channel<i32> = Channel::new(1);
        let b: Channel<i32> = Channel::new(1);
        a.try_send(1);
        b.try_send(2);

        let result = Scheduler::run_blocking(async move {
            Select::new()
                .with_receive(&a, |v| format!("a:{v}"))
                .with_receive(&b, |v| format!("b:{v}"))
                .execute()
                .await
        })
        .unwrap();
        assert_eq!(*result, "a:1");
    }

    #[test]
    fn default_wins_when_nothing_ready() {
        let a: Channel<i32> = Channel::new(1);
        let result = Scheduler::run_blocking(async move {
            Select::new()
                .with_receive(&a, |v| v)
                .or_default(-1)
                .execute()
                .await
        })
        .unwrap();
        assert_eq!(*result, -1);
    }

    #[test]
    fn blocking_fallback_completes_once_a_value_arrives() {
        let a: Channel<i32> = Channel::new(1);
        let producer = a.clone();

        let result = Scheduler::run_blocking(async move {
            let scheduler = crate::scheduler::current();
            scheduler.spawn(crate::scheduler::Dispatcher::Default, async move {
                producer.try_send(99);
                Ok::<(), Error>(())
            });
            Select::new().with_receive(&a, |v| v).execute().await
        })
        .unwrap();
        assert_eq!(*result, 99);
    }
}
