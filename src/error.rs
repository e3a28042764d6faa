//! Error taxonomy for the runtime core.
//!
//! One enum covers every failure mode a task, channel, stream, or I/O
//! primitive can report, in the spirit of `raya_sdk::error::NativeError`:
//! a single flat `Error` type with `#[error("...")]` messages rather than
//! a tree of per-module error types.

use std::fmt;

/// The runtime's error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An operation was attempted from a task/flow/channel state that
    /// disallows it (e.g. `cancel()` on an already-final task).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An argument violated a stated precondition (negative capacity,
    /// `repeat(0, ..)`, an empty name, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `withTimeout` deadline expired before the body completed.
    #[error("operation timed out")]
    Timeout,

    /// An `Error` backpressure strategy fired on a full buffer.
    #[error("buffer overflow")]
    BufferOverflow,

    /// A send was attempted on a closed channel.
    #[error("channel is closed")]
    ChannelClosed,

    /// A readiness, DNS, connect, or read/write failure from the async I/O
    /// surface.
    #[error("io error: {0}")]
    Io(String),

    /// The worker-pool backend reported a failure for an off-process job.
    #[error("worker error: {0}")]
    Worker(String),

    /// A task body panicked; the panic payload (if a string) is preserved.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A lower layer only had a string to report; mirrors
    /// `raya_sdk::error::NativeError::AbiError`'s role as the catch-all a
    /// bare `String`/`&str` converts into.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an [`Error::IllegalState`] from a display-able reason.
    pub fn illegal_state(reason: impl fmt::Display) -> Self {
        Error::IllegalState(reason.to_string())
    }

    /// Build an [`Error::InvalidArgument`] from a display-able reason.
    pub fn invalid_argument(reason: impl fmt::Display) -> Self {
        Error::InvalidArgument(reason.to_string())
    }

    /// True for the variants §7 classifies as asynchronous/I-O surfaced
    /// (thrown "from the task's next resume" rather than synchronously).
    pub fn is_async_surfaced(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Io(_) | Error::Worker(_) | Error::ChannelClosed
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
