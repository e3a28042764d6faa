//! Small suspension utilities (§4.11): `pause`, `delay`, `repeat`. The
//! main-entry guard named alongside them in the module table lives on
//! [`crate::scheduler::Scheduler::run_blocking`] itself, since that is the
//! actual "main entry" a program calls into.

use crate::clock;
use crate::error::Error;
use crate::scheduler::try_current;
use crate::suspend::YieldOnce;

/// `pause()` (§4.11): inside a task, drive one ready-queue step and one
/// worker-pool step, then yield once. Outside a task (no scheduler
/// currently driving this thread), a no-op.
pub async fn pause() {
    if let Some(scheduler) = try_current() {
        scheduler.ready_queue_step();
        scheduler.worker_pool_step();
        YieldOnce::new().await;
    }
}

/// `delay(ms)` (§4.11): suspend until at least `ms` milliseconds have
/// elapsed. Fiber-aware: inside a task, each iteration is a soft yield so
/// other ready tasks keep making progress; outside any task, there is no
/// ready queue to share, so the wait is a plain idle-sleep loop.
///
/// `ms <= 0` returns immediately without suspending at all.
pub async fn delay(ms: f64) {
    if ms <= 0.0 {
        return;
    }
    let start = clock::now_ms();
    let deadline = ms as u64;
    match try_current() {
        Some(scheduler) => {
            while clock::elapsed_ms(start) < deadline {
                scheduler.ready_queue_step();
                scheduler.worker_pool_step();
                YieldOnce::new().await;
            }
        }
        None => {
            while clock::elapsed_ms(start) < deadline {
                std::thread::sleep(std::time::Duration::from_micros(500));
            }
        }
    }
}

/// `repeat(n, f)` (§4.11): call `f(i)` for `i` in `0..n`, synchronously,
/// propagating the first error `f` returns. `n <= 0` is itself an
/// `InvalidArgument` — there is no iteration count to race against.
pub fn repeat<F>(n: i64, mut f: F) -> Result<(), Error>
where
    F: FnMut(i64) -> Result<(), Error>,
{
    if n <= 0 {
        return Err(Error::invalid_argument(format!(
            "repeat: n must be > 0, got {n}"
        )));
    }
    for i in 0..n {
        f(i)?;
    }
    Ok(())
}
