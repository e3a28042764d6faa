//! Timeout combinators (§4.7): `withTimeout` / `withTimeoutOrNull`.
//!
//! Grounded on `task.rs`'s own `cancelAfter`/`isTimedOut` pair — a timeout
//! here is just a child task with a deadline, driven through the in-fiber
//! join loop (§4.1) so the outer caller's own suspension is exactly a
//! nested instance of the same primitive everything else in this crate
//! suspends on. Returns `Rc<T>`, matching `JoinHandle::join`'s own
//! convention (§3/task.rs), rather than trying to unwrap to a bare `T` that
//! would need an unjustified `T: Clone` bound.

use std::rc::Rc;

use crate::error::Error;
use crate::scheduler::{current, Dispatcher};

/// `withTimeout(ms, f)` (§4.7): run `f` as a child task; if it has not
/// reached a final state within `ms`, cancel it and report `Error::Timeout`.
/// `ms <= 0` is itself an error — there is no grace period to race against.
pub async fn with_timeout<T, F>(ms: f64, body: F) -> Result<Rc<T>, Error>
where
    F: std::future::Future<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    if ms <= 0.0 {
        return Err(Error::Timeout);
    }
    let scheduler = current();
    let handle = scheduler.spawn(Dispatcher::Default, body);
    handle.cancel_after(ms / 1000.0);
    handle.join().await
}

/// `withTimeoutOrNull(ms, f)` (§4.7): same as [`with_timeout`] but converts
/// a timeout into `None` rather than propagating it; `ms <= 0` is also a
/// silent `None` here, not an error.
pub async fn with_timeout_or_null<T, F>(ms: f64, body: F) -> Option<Rc<T>>
where
    F: std::future::Future<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    if ms <= 0.0 {
        return None;
    }
    let scheduler = current();
    let handle = scheduler.spawn(Dispatcher::Default, body);
    handle.cancel_after(ms / 1000.0);
    handle.join().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::future::pending;

    #[test]
    fn completes_before_deadline_returns_value() {
        let result =
            Scheduler::run_blocking(async { with_timeout(50.0, async { Ok::<i32, Error>(7) }).await })
                .unwrap();
        assert_eq!(**result, 7);
    }

    #[test]
    fn never_completing_body_times_out() {
        let result = Scheduler::run_blocking(async {
            with_timeout(1.0, pending::<Result<i32, Error>>()).await
        });
        match result {
            Ok(_) => panic!("expected a timeout"),
            Err(e) => assert!(matches!(e, Error::Timeout)),
        }
    }

    #[test]
    fn non_positive_deadline_is_immediate_timeout() {
        let result =
            Scheduler::run_blocking(async { with_timeout(0.0, async { Ok::<i32, Error>(1) }).await });
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[test]
    fn or_null_converts_timeout_to_none() {
        let result = Scheduler::run_blocking(async {
            Ok::<_, Error>(with_timeout_or_null(1.0, pending::<Result<i32, Error>>()).await)
        })
        .unwrap();
        assert!((*result).is_none());
    }

    #[test]
    fn or_null_non_positive_deadline_is_silent_none() {
        let result = Scheduler::run_blocking(async {
            Ok::<_, Error>(with_timeout_or_null(0.0, async { Ok::<i32, Error>(1) }).await)
        })
        .unwrap();
        assert!((*result).is_none());
    }
}
