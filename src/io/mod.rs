//! Async I/O surface (§4.4): the low-level readiness multiplexer
//! ([`poller`]) plus the high-level primitives built on it ([`net`],
//! [`stream_io`], [`http`]).

pub mod http;
pub mod net;
pub mod poller;
pub mod stream_io;

use std::rc::Rc;

use mio::event::Source;

use crate::clock::now_ms;
use crate::error::Error;
use crate::scheduler::{current, current_task, Scheduler};
use crate::suspend::{mark_hard_suspend, YieldOnce};

pub use poller::WaitOutcome;

/// Shared waiting primitive behind every high-level I/O operation:
/// register a read or write waiter for `source` with the currently driving
/// scheduler, hard-suspend the current task, and resume once the poller
/// reports readiness, close, or the waiter's own `timeout_ms` deadline
/// (`<= 0.0` waits indefinitely).
pub(crate) async fn wait_for(
    source: &mut dyn Source,
    write: bool,
    timeout_ms: f64,
) -> Result<WaitOutcome, Error> {
    let scheduler: Rc<Scheduler> = current();
    let task = current_task();
    let deadline = if timeout_ms > 0.0 {
        Some(now_ms() + timeout_ms as u64)
    } else {
        None
    };
    let slot = poller::new_ready_slot();
    let token = {
        let mut p = scheduler.poller().borrow_mut();
        if write {
            p.register_write(source, task, slot.clone(), deadline)
        } else {
            p.register_read(source, task, slot.clone(), deadline)
        }
    }
    .map_err(Error::from)?;

    loop {
        if let Some(outcome) = slot.get() {
            scheduler.poller().borrow_mut().deregister(source, token);
            return Ok(outcome);
        }
        mark_hard_suspend();
        YieldOnce::new().await;
    }
}
