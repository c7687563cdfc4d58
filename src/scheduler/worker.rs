// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single worker thread: its local run queue, its steal deck, and the tick/steal loop.
//!
//! Grounded on the teacher's `executor.rs` `Worker::tick`/`try_steal`/`steal_one_round`: same
//! shape (pop local, try to steal, otherwise look at the shared queues, otherwise park), with the
//! `Future`-poll step replaced by [`crate::task::Header::dispatch`] since this runtime's task
//! bodies run to completion rather than being resumed across multiple ticks.

use super::{Scheduler, CURRENT_WORKER};
use crate::deque::Deque;
use crate::task::TaskRef;

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// How long a parked worker waits before rechecking its work sources, even without an explicit
/// notification. See `Notify`'s doc comment in `scheduler/mod.rs`.
const PARK_TIMEOUT: Duration = Duration::from_millis(5);

pub(crate) struct Worker {
    id: usize,
    scheduler: &'static Scheduler,
    local: Arc<Deque<TaskRef>>,
    rng: RefCell<fastrand::Rng>,
}

impl Worker {
    fn new(id: usize, scheduler: &'static Scheduler) -> Self {
        Self {
            id,
            scheduler,
            local: scheduler.local_queues[id].clone(),
            rng: RefCell::new(fastrand::Rng::with_seed(id as u64)),
        }
    }

    /// The worker thread's entry point: runs until [`Scheduler::shutdown`] is observed and no
    /// work remains, then returns (the thread then exits).
    pub(crate) fn run(id: usize, scheduler: &'static Scheduler) {
        let worker = Arc::new(Self::new(id, scheduler));
        CURRENT_WORKER.with(|c| *c.borrow_mut() = Some(worker.clone()));
        let _span = tracing::debug_span!("worker", worker.id = id).entered();
        tracing::trace!("worker started");

        loop {
            if worker.tick() {
                continue;
            }
            if scheduler.is_shutting_down() {
                break;
            }
            tracing::trace!("parking");
            scheduler.notify.park(PARK_TIMEOUT);
        }

        tracing::trace!("worker stopped");
        CURRENT_WORKER.with(|c| *c.borrow_mut() = None);
    }

    /// Pushes onto this worker's own end of its local queue (spec §4.5: "submissions from inside
    /// a running task → the task's current worker queue").
    pub(crate) fn push_local(&self, task: TaskRef) -> Result<(), TaskRef> {
        self.local.push_right(task)
    }

    /// Runs one unit of work if any is available from any source. Returns `false` only once
    /// every source (local queue, steal deck, foreign queue, main queue) came up empty.
    pub(crate) fn tick(&self) -> bool {
        if let Some(task) = self.local.pop_right() {
            task.dispatch();
            return true;
        }
        if let Some(task) = self.try_steal() {
            task.dispatch();
            return true;
        }
        if let Some(task) = self.scheduler.foreign.try_pop() {
            task.dispatch();
            return true;
        }
        if let Some(task) = self.scheduler.main.try_pop() {
            task.dispatch();
            return true;
        }
        false
    }

    /// Called from [`crate::futex::block_until`] while a task on this worker is waiting: keeps
    /// the worker productive (running other ready work) instead of parking the OS thread.
    pub(crate) fn help(&self) -> bool {
        self.tick()
    }

    /// Builds a fresh shuffled permutation of the other workers' ids and steals a single task
    /// from the first victim that has one (spec §4.5/§2 "random-victim stealing via a shuffled
    /// deck").
    fn try_steal(&self) -> Option<TaskRef> {
        let queues = &self.scheduler.local_queues;
        let n = queues.len();
        if n <= 1 {
            return None;
        }

        let mut deck: Vec<usize> = (0..n).filter(|&i| i != self.id).collect();
        self.rng.borrow_mut().shuffle(&mut deck);

        for victim in deck {
            if let Some(task) = queues[victim].pop_left() {
                tracing::trace!(victim, "stole task");
                return Some(task);
            }
        }
        None
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("queue_len", &self.local.len())
            .finish()
    }
}
