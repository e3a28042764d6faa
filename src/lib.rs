//! A single-threaded, cooperative structured-concurrency runtime: a
//! scheduler driving tasks/jobs, channels with `select`, timeout
//! combinators, reactive streams (`Flow`/`SharedFlow`/`StateFlow`), a
//! worker pool for off-thread computation, and the async I/O primitives
//! (`net`/`stream_io`/`http`) built on top of a `mio`-backed readiness
//! poller.
//!
//! Everything here lives on one OS thread (§5 of the design docs): no
//! `Arc`/`Mutex`, just `Rc`/`RefCell` and a handful of thread-local
//! contexts (the current scheduler, the task currently being polled).
//! Parallelism is delegated entirely to the worker pool, which runs
//! computations off-thread and reports results back through the scheduler.
//!
//! Entry points: [`scheduler::Scheduler::run_blocking`] starts the root
//! task and drives the runtime to completion; [`glue::pause`],
//! [`glue::delay`], and [`glue::repeat`] are the small suspension
//! utilities a task body reaches for directly.

pub mod backpressure;
pub mod channel;
pub mod clock;
pub mod error;
pub mod flow;
pub mod glue;
pub mod io;
pub mod ready_queue;
pub mod scheduler;
pub mod select;
pub mod shared_flow;
pub mod state_flow;
pub mod suspend;
pub mod task;
pub mod timeout;
pub mod value;
pub mod worker_pool;

pub use backpressure::BackpressureStrategy;
pub use channel::Channel;
pub use error::{Error, Result};
pub use flow::Flow;
pub use glue::{delay, pause, repeat};
pub use scheduler::{Dispatcher, Scheduler, SchedulerConfig};
pub use select::Select;
pub use shared_flow::SharedFlow;
pub use state_flow::StateFlow;
pub use task::{JoinHandle, TaskId, TaskState};
pub use timeout::{with_timeout, with_timeout_or_null};
pub use value::Value;
pub use worker_pool::WorkerPoolConfig;
