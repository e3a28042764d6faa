//! FIFO ready queue over task ids (§3).
//!
//! `VecDeque<TaskId>` for scheduling order plus an `FxHashMap<TaskId, Rc<Task>>`
//! for O(1) lookup/removal by id (e.g. when `cancel()` needs a task pulled
//! out of the queue early). Grounded on the teacher's `rustc-hash` usage for
//! the task table (`raya-engine/src/vm/vm/shared_state.rs::SharedVmState::tasks`),
//! adapted from `Arc<RwLock<FxHashMap<..>>>` to a plain `RefCell`-free
//! `FxHashMap` since a single scheduler thread owns it (§5).

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::task::{Task, TaskId};

/// FIFO of runnable task ids, plus the id -> task lookup table backing it.
#[derive(Default)]
pub struct ReadyQueue {
    order: VecDeque<TaskId>,
    tasks: FxHashMap<TaskId, Rc<Task>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insertion order is scheduling order (§3).
    pub fn push(&mut self, task: Rc<Task>) {
        let id = task.id();
        self.tasks.insert(id, task);
        self.order.push_back(id);
    }

    /// Dequeue the next runnable task, if any.
    pub fn pop(&mut self) -> Option<Rc<Task>> {
        loop {
            let id = self.order.pop_front()?;
            // A task may have been cancelled out of the map without its
            // queue entry being removed (cancellation during another tick);
            // skip stale ids rather than resurrecting a removed task.
            if let Some(task) = self.tasks.remove(&id) {
                return Some(task);
            }
        }
    }

    /// Remove a specific task id from the queue ahead of its natural turn
    /// (used when cancellation pulls a task out of ready-queue rotation).
    pub fn remove(&mut self, id: TaskId) -> Option<Rc<Task>> {
        self.tasks.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn pending_task() -> Rc<Task> {
        Task::new(Box::pin(std::future::pending()), None)
    }

    #[test]
    fn fifo_order_preserved() {
        let mut q = ReadyQueue::new();
        let a = pending_task();
        let b = pending_task();
        let (a_id, b_id) = (a.id(), b.id());
        q.push(a);
        q.push(b);
        assert_eq!(q.pop().unwrap().id(), a_id);
        assert_eq!(q.pop().unwrap().id(), b_id);
        assert!(q.pop().is_none());
    }

    #[test]
    fn remove_skips_stale_entry_on_pop() {
        let mut q = ReadyQueue::new();
        let a = pending_task();
        let b = pending_task();
        let (a_id, b_id) = (a.id(), b.id());
        q.push(a);
        q.push(b);
        assert!(q.remove(a_id).is_some());
        assert_eq!(q.pop().unwrap().id(), b_id);
        assert!(q.pop().is_none());
    }

    #[test]
    fn len_and_is_empty_track_live_entries() {
        let mut q = ReadyQueue::new();
        assert!(q.is_empty());
        q.push(pending_task());
        assert_eq!(q.len(), 1);
        q.pop();
        assert!(q.is_empty());
    }
}
