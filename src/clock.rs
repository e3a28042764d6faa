//! Monotonic clock.
//!
//! All deadlines and timestamps in the runtime are expressed as milliseconds
//! since an arbitrary process-local epoch, never wall-clock time. Grounded on
//! `raya-engine`'s use of `std::time::Instant` for task timing — a single
//! shared epoch captured once (here via `once_cell::sync::Lazy`) instead of a
//! fresh `Instant::now()` per task, since the latter would make relative
//! comparisons across tasks need a subtraction every time.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic milliseconds elapsed since the process-local epoch.
pub fn now_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Milliseconds elapsed since `start` (itself a value previously returned by
/// [`now_ms`]).
pub fn elapsed_ms(start: u64) -> u64 {
    now_ms().saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn elapsed_ms_reports_delta() {
        let start = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(elapsed_ms(start) >= 10);
    }
}
