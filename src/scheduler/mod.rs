// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The work-stealing scheduler (C6): one run queue per execution context, a main queue for the
//! thread that called [`crate::runtime_init`], and a foreign queue for everyone else.
//!
//! Mirrors the teacher's `executor.rs`/`scheduler.rs` split: an `Executor`-equivalent
//! ([`Scheduler`]) owns the queues and worker thread handles, a `Worker`-equivalent
//! ([`worker::Worker`]) owns one queue plus the per-thread steal state. The teacher's `Worker`
//! polls a `Future`; this one pops a [`crate::task::TaskRef`] and runs it to completion via
//! [`crate::task::Header::dispatch`] — see `DESIGN.md` for why that's the right generalization of
//! "poll" for a run-to-completion task body.

mod worker;

pub(crate) use worker::Worker;

use crate::config::RuntimeConfig;
use crate::deque::Deque;
use crate::queue::DualQueue;
use crate::task::{TaskAttrs, TaskRef};

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

thread_local! {
    static CURRENT_WORKER: RefCell<Option<std::sync::Arc<Worker>>> = const { RefCell::new(None) };
}

pub(crate) struct Scheduler {
    /// One bounded deque per execution context, indexed by worker id.
    local_queues: Vec<std::sync::Arc<Deque<TaskRef>>>,
    /// Submissions from the thread that called `runtime_init` (spec §4.5 "main queue").
    main: DualQueue<TaskRef>,
    /// Submissions from everyone else, plus yield-tagged tasks (spec §4.5 "foreign queue").
    foreign: DualQueue<TaskRef>,
    notify: Notify,
    config: RuntimeConfig,
    main_thread: ThreadId,
    shutting_down: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// The scheduler's idle/wake signal ("the thread manager's condition variable" of spec §4.5).
///
/// Workers recheck all of their work sources (local queue, steal deck, foreign queue, main
/// queue) on every wakeup rather than trusting a precise wakeup count, so a short timeout is a
/// correctness-preserving backstop rather than a polling crutch: it only matters if a `notify`
/// and a competing worker's `park` raced in a way that dropped the wakeup.
struct Notify {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Notify {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify_one(&self) {
        self.cv.notify_one();
    }

    fn notify_all(&self) {
        self.cv.notify_all();
    }

    fn park(&self, timeout: Duration) {
        let guard = self.lock.lock().unwrap();
        let _ = self.cv.wait_timeout(guard, timeout).unwrap();
    }
}

impl Scheduler {
    fn new(config: RuntimeConfig) -> Self {
        let local_queues = (0..config.worker_count())
            .map(|_| std::sync::Arc::new(Deque::new(config.deque_capacity())))
            .collect();
        Self {
            local_queues,
            main: DualQueue::new(),
            foreign: DualQueue::new(),
            notify: Notify::new(),
            main_thread: thread::current().id(),
            shutting_down: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Spawns one OS thread per execution context. Called once, immediately after the
    /// [`Scheduler`] is installed in [`SCHEDULER`], so `self` is already `'static`.
    fn start(&'static self) {
        let mut threads = self.threads.lock().unwrap();
        for id in 0..self.local_queues.len() {
            let handle = thread::Builder::new()
                .name(format!("weave-worker-{id}"))
                .spawn(move || Worker::run(id, self))
                .expect("failed to spawn weave-rt worker thread");
            threads.push(handle);
        }
    }

    fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.main.close();
        self.foreign.close();
        self.notify.notify_all();
        let handles = std::mem::take(&mut *self.threads.lock().unwrap());
        for h in handles {
            let _ = h.join();
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

fn global() -> &'static Scheduler {
    SCHEDULER
        .get()
        .expect("weave_rt: runtime_init() must be called before using the runtime")
}

pub(crate) fn try_global() -> Option<&'static Scheduler> {
    SCHEDULER.get()
}

/// Installs the global scheduler and starts its worker threads. Called once by
/// [`crate::runtime_init`]; a second call is a no-op (the `OnceLock` silently keeps the first
/// scheduler), matching "once per process" (spec §6) since `runtime_init` itself already rejects
/// a second call before reaching here.
pub(crate) fn init(config: RuntimeConfig) {
    let sched = SCHEDULER.get_or_init(|| Scheduler::new(config));
    sched.start();
}

pub(crate) fn shutdown() {
    if let Some(s) = SCHEDULER.get() {
        s.shutdown();
    }
}

pub(crate) fn config() -> &'static RuntimeConfig {
    &global().config
}

/// The number of execution contexts (worker threads) the runtime was configured with. Used by
/// the parallel patterns (`src/pfor/mod.rs`) to size their static chunking.
#[must_use]
pub fn num_execution_contexts() -> usize {
    global().local_queues.len()
}

/// The [`Worker`] running on the calling thread, if any. `None` on the main thread, on a thread
/// never handed to the runtime, or before `runtime_init`.
pub(crate) fn current_worker() -> Option<std::sync::Arc<Worker>> {
    CURRENT_WORKER.with(|c| c.borrow().clone())
}

/// Implements the `push_task` submission policy of spec §4.5.
pub(crate) fn submit(task: TaskRef) {
    let s = global();
    if task.attrs().contains(TaskAttrs::YIELD) {
        s.foreign.push(task);
    } else if let Some(worker) = current_worker() {
        if let Err(spilled) = worker.push_local(task) {
            s.foreign.push(spilled);
        }
    } else if thread::current().id() == s.main_thread {
        s.main.push(task);
    } else {
        s.foreign.push(task);
    }
    s.notify.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{create_task, TaskBody};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// `tests/e2e.rs` exercises the full worker-thread pool; here we only exercise the queue
    /// routing logic directly, since a second `runtime_init()` in the same process would error.
    #[test]
    fn submit_from_non_worker_thread_goes_to_foreign_queue() {
        let config = RuntimeConfig::builder().worker_count(1).build();
        let sched = Scheduler::new(config);
        // Not installed as the global scheduler (avoids cross-test global state); exercised
        // directly instead of through `submit`, which requires the global to be initialized.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let task = create_task(TaskBody::Plain(Box::new(move || {
            ran2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })));
        sched.foreign.push(task.clone());
        assert_eq!(sched.foreign.len(), 1);
        let popped = sched.foreign.try_pop().unwrap();
        assert!(Arc::ptr_eq(&popped, &task));
    }
}
