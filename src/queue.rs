// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The dual task queue (C2): the scheduler's unbounded main/foreign queues.
//!
//! The original is a hazard-pointer-reclaimed lock-free linked list holding either values or
//! pending-consumer request nodes. Spec §9 asks only for the *property* ("a thread cannot
//! read-after-free a dual-queue node"), not the hazard-pointer mechanism itself; `std::sync`
//! already gives that property for free, so this is a plain `Mutex<VecDeque<T>>`, in the same
//! spirit as the teacher's `sync/wait_queue.rs` (`Mutex<linked_list::List<Waiter>>`). FIFO among
//! values and at-most-once delivery fall out of `VecDeque` directly. Unlike the original, blocked
//! consumers here don't park on this queue's own condition variable: every worker instead shares
//! one scheduler-wide `Notify` (`scheduler/mod.rs`) that covers all of its work sources (local
//! queue, steal deck, this queue) at once, so a single wakeup can't be scoped to just one source.
//! `close` exists for symmetry with the original's queue-closing shutdown signal even though this
//! scheduler's own `shutting_down` flag is what workers actually check.

use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) struct DualQueue<T> {
    values: Mutex<VecDeque<T>>,
}

impl<T> DualQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            values: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, v: T) {
        self.values.lock().unwrap().push_back(v);
    }

    /// Removes a value without blocking.
    pub(crate) fn try_pop(&self) -> Option<T> {
        self.values.lock().unwrap().pop_front()
    }

    /// Drops every queued value. Called at `runtime_shutdown`, after the shared `Notify` has
    /// already woken every worker and `shutting_down` is set, so nothing will try to enqueue here
    /// again.
    pub(crate) fn close(&self) {
        self.values.lock().unwrap().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
