// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! In-runtime wait/wake (C7).
//!
//! The original's futex suspends a *task*, not its worker: a blocked task enqueues itself and
//! the worker returns to the scheduler loop to run other work, later being redispatched by
//! `wake`. This crate's task bodies are ordinary synchronous closures rather than a poll-based
//! state machine, so there is no continuation to suspend and later resume mid-body. We get the
//! same observable property — a waiting *worker* stays productive rather than parking — a
//! different way: [`block_until`], called from inside a task, drives the calling worker's own
//! scheduler loop (local queue, then stealing, then the foreign queue) until the condition holds,
//! instead of sleeping. Called from outside any worker (e.g. the embedder's main thread calling
//! `wait_for`), it parks on a real condition variable.
//!
//! [`GroupWaiter`] is the "dedicated one-shot condition object" the design notes permit in place
//! of modelling the trigger task as a full task (see `SPEC_FULL.md` §9); it backs both
//! `wait_for(group)` and `wait(task)`.

use std::sync::{Arc, Condvar, Mutex};

/// A one-shot, level-triggered wakeup. A race between `signal` and `wait`/registration can never
/// lose a wakeup: callers either observe the condition already true at registration time (and
/// skip creating a waiter at all), or register under the same lock the signalling side drains
/// under.
pub(crate) struct GroupWaiter {
    signalled: Mutex<bool>,
    cv: Condvar,
}

impl GroupWaiter {
    fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn signal(&self) {
        *self.signalled.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.signalled.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

/// Blocks `handle`'s caller until `is_done(&handle)` holds.
///
/// `register` is called with a fresh [`GroupWaiter`] only on the OS-thread-parking path; it must
/// arrange for `waiter.signal()` to be called once the condition becomes true, and must itself
/// check the condition under whatever lock serializes against the wakeup to avoid a missed
/// signal (see `Group::register_waiter` / `task::Header::register_waiter`).
pub(crate) fn block_until<T>(
    handle: T,
    mut is_done: impl FnMut(&T) -> bool,
    register: impl FnOnce(&T, Arc<GroupWaiter>),
) {
    if is_done(&handle) {
        return;
    }

    if let Some(worker) = crate::scheduler::current_worker() {
        while !is_done(&handle) {
            if !worker.help() {
                std::thread::yield_now();
            }
        }
        return;
    }

    let waiter = Arc::new(GroupWaiter::new());
    register(&handle, waiter.clone());
    waiter.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let w = GroupWaiter::new();
        w.signal();
        w.wait(); // must return immediately
    }

    #[test]
    fn wait_wakes_on_signal_from_another_thread() {
        let w = Arc::new(GroupWaiter::new());
        let w2 = w.clone();
        let woke = Arc::new(AtomicBool::new(false));
        let woke2 = woke.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            woke2.store(true, Ordering::SeqCst);
            w2.signal();
        });
        w.wait();
        assert!(woke.load(Ordering::SeqCst));
        handle.join().unwrap();
    }
}
