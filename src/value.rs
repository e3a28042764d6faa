//! Type-erased payload carried by tasks, channels, and streams.
//!
//! The spec's data model describes a task's `returnValue` and a channel's
//! payload abstractly — the core does not care what a host language's
//! values look like. Rather than make every subsystem generic over a value
//! type (which would force `Scheduler`'s task table, a single homogeneous
//! collection, to be generic too), task bodies produce a type-erased
//! [`Value`] and callers downcast it back through a typed [`crate::task::JoinHandle`].
//! `Flow`'s operator pipeline (§3's tagged operator entries) also erases
//! through `Value` internally, since `map`/`flatMap` change the item type
//! at each stage; `Flow<T>`/`SharedFlow<T>`/`StateFlow<T>` stay monomorphic
//! at their public edges (construction and `collect`/`emit`), downcasting
//! back to `T` only at the boundary.

use std::any::Any;
use std::fmt;

/// A type-erased value moving through the task system.
pub type Value = Box<dyn Any>;

/// Wrap a concrete value as an erased [`Value`].
pub fn boxed<T: 'static>(v: T) -> Value {
    Box::new(v)
}

/// Downcast an erased [`Value`] back to `T`, panicking on mismatch.
///
/// A mismatch here is a caller bug (the `JoinHandle<T>` type parameter no
/// longer matches what the task body actually produced) rather than a
/// recoverable runtime condition, so this panics like `Any::downcast`
/// callers typically do.
pub fn downcast<T: 'static>(v: Value) -> T {
    match v.downcast::<T>() {
        Ok(boxed) => *boxed,
        Err(_) => panic!("corowork: task result type mismatch"),
    }
}

/// Borrow an erased [`Value`] as `&T`, panicking on mismatch. Used by
/// pipeline operators (`filter`, `onEach`, `distinctUntilChanged`) that need
/// to inspect a value without consuming it.
pub fn downcast_ref<T: 'static>(v: &Value) -> &T {
    v.downcast_ref::<T>()
        .unwrap_or_else(|| panic!("corowork: value type mismatch"))
}

/// A `Value` with no payload, used for `Task<()>`-shaped bodies.
pub fn unit() -> Value {
    boxed(())
}

pub(crate) struct DebugValue<'a>(pub &'a Value);

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(..)")
    }
}
