//! The readiness multiplexer (`AsyncIO`, §4.4).
//!
//! One `mio::Poll` instance backs two waiter registries (read/write),
//! keyed by a stable waiter id (`mio::Token`). This is the ecosystem-direct
//! realization of §6's host contract `select(readSet, writeSet, timeout_us)`
//! — mio is the crate the retrieval pack's `other_examples/` surfaces for
//! exactly this role, and the teacher has no equivalent (its readiness is
//! folded into a bytecode VM's own IO worker threads, not exposed as a
//! reusable primitive), so this module is the one place SPEC_FULL adds a
//! dependency the teacher doesn't carry.
//!
//! A waiter does not get its readiness value delivered by a callback —
//! there is no `Waker` machinery driving real wakeups here (§5: the
//! scheduler tick *is* the driver). Instead each waiting leaf future owns a
//! [`ReadySlot`] it shares with the registry entry; `pollOnce` writes the
//! readiness bool into the slot and hands back the task so the scheduler
//! can re-enqueue it, and the future reads the slot on its next poll.

use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use rustc_hash::FxHashMap;

use crate::clock::now_ms;
use crate::task::Task;

/// Outcome written into a waiter's [`ReadySlot`] once it is resumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The descriptor reported readiness in the requested direction.
    Ready,
    /// The descriptor closed, errored, or hit EOF before becoming ready.
    Closed,
    /// The waiter's own deadline (§4.4's "loop until bytes or eof or
    /// timeout") elapsed before the poller ever observed readiness.
    TimedOut,
}

/// Shared cell a waiting future polls after being resumed (§3's "I/O
/// waiter").
pub type ReadySlot = Rc<Cell<Option<WaitOutcome>>>;

pub fn new_ready_slot() -> ReadySlot {
    Rc::new(Cell::new(None))
}

struct Waiter {
    task: Rc<Task>,
    slot: ReadySlot,
    /// Absolute deadline in [`crate::clock::now_ms`] terms; `None` waits
    /// indefinitely for readiness or close.
    deadline: Option<u64>,
}

/// Registry of read/write waiters plus the `mio::Poll` driving them.
pub struct IoPoller {
    poll: Poll,
    events: Events,
    next_token: usize,
    read_waiters: FxHashMap<Token, Waiter>,
    write_waiters: FxHashMap<Token, Waiter>,
}

impl IoPoller {
    pub fn new() -> io::Result<Self> {
        Ok(IoPoller {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            next_token: 1,
            read_waiters: FxHashMap::default(),
            write_waiters: FxHashMap::default(),
        })
    }

    fn next_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    /// Register a read waiter for `source`; the task is resumed on the
    /// next `pollOnce()` readiness pass, close/error, or `deadline` elapsing
    /// (§4.4's "at most one live waiter per direction per descriptor").
    pub fn register_read(
        &mut self,
        source: &mut dyn Source,
        task: Rc<Task>,
        slot: ReadySlot,
        deadline: Option<u64>,
    ) -> io::Result<Token> {
        let token = self.next_token();
        self.poll
            .registry()
            .register(source, token, Interest::READABLE)?;
        self.read_waiters.insert(
            token,
            Waiter {
                task,
                slot,
                deadline,
            },
        );
        Ok(token)
    }

    pub fn register_write(
        &mut self,
        source: &mut dyn Source,
        task: Rc<Task>,
        slot: ReadySlot,
        deadline: Option<u64>,
    ) -> io::Result<Token> {
        let token = self.next_token();
        self.poll
            .registry()
            .register(source, token, Interest::WRITABLE)?;
        self.write_waiters.insert(
            token,
            Waiter {
                task,
                slot,
                deadline,
            },
        );
        Ok(token)
    }

    pub fn deregister(&mut self, source: &mut dyn Source, token: Token) {
        let _ = self.poll.registry().deregister(source);
        self.read_waiters.remove(&token);
        self.write_waiters.remove(&token);
    }

    pub fn has_waiters(&self) -> bool {
        !self.read_waiters.is_empty() || !self.write_waiters.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.read_waiters.len() + self.write_waiters.len()
    }

    /// Walk both registries and evict any waiter past its own deadline,
    /// resuming it with [`WaitOutcome::TimedOut`] (§4.4's `pollOnce`
    /// registry walk, extended with the high-level primitives' own
    /// "... or timeout" clause).
    fn evict_expired(&mut self, resumed: &mut Vec<Rc<Task>>) {
        let now = now_ms();
        let mut expired_tokens = Vec::new();
        for (token, w) in self.read_waiters.iter().chain(self.write_waiters.iter()) {
            if w.deadline.is_some_and(|d| now >= d) {
                expired_tokens.push(*token);
            }
        }
        for token in expired_tokens {
            if let Some(w) = self.read_waiters.remove(&token) {
                w.slot.set(Some(WaitOutcome::TimedOut));
                resumed.push(w.task);
            } else if let Some(w) = self.write_waiters.remove(&token) {
                w.slot.set(Some(WaitOutcome::TimedOut));
                resumed.push(w.task);
            }
        }
    }

    /// `pollOnce()` (§4.4): one readiness pass with a short timeout. Writes
    /// an outcome into each resumed waiter's [`ReadySlot`] and returns the
    /// tasks to re-enqueue (empty means "no work", per §4.1).
    pub fn poll_once(&mut self, timeout: Duration) -> Vec<Rc<Task>> {
        let mut resumed = Vec::new();
        if !self.has_waiters() {
            return resumed;
        }
        self.evict_expired(&mut resumed);
        if !self.has_waiters() {
            return resumed;
        }
        if self.poll.poll(&mut self.events, Some(timeout)).is_err() {
            return resumed;
        }

        for ev in self.events.iter() {
            let token = ev.token();
            let closed = ev.is_error() || ev.is_read_closed() || ev.is_write_closed();
            let outcome = if closed {
                WaitOutcome::Closed
            } else {
                WaitOutcome::Ready
            };

            if ev.is_readable() || (closed && self.read_waiters.contains_key(&token)) {
                if let Some(w) = self.read_waiters.remove(&token) {
                    w.slot.set(Some(outcome));
                    resumed.push(w.task);
                }
            }
            if ev.is_writable() || (closed && self.write_waiters.contains_key(&token)) {
                if let Some(w) = self.write_waiters.remove(&token) {
                    w.slot.set(Some(outcome));
                    resumed.push(w.task);
                }
            }
        }
        resumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_waiters_means_no_work() {
        let mut poller = IoPoller::new().unwrap();
        let resumed = poller.poll_once(Duration::from_micros(200));
        assert!(resumed.is_empty());
    }

    #[test]
    fn expired_deadline_resumes_with_timed_out() {
        use crate::task::Task;
        use std::future::pending;

        let mut poller = IoPoller::new().unwrap();
        let (mut a, _b) = mio::net::UnixStream::pair().unwrap();
        let task = Task::new(Box::pin(async { pending::<Result<crate::value::Value, crate::error::Error>>().await }), None);
        let slot = new_ready_slot();
        poller
            .register_read(&mut a, task.clone(), slot.clone(), Some(0))
            .unwrap();

        let resumed = poller.poll_once(Duration::from_micros(200));
        assert_eq!(resumed.len(), 1);
        assert_eq!(slot.get(), Some(WaitOutcome::TimedOut));
    }
}
