// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! weave-rt: a heterogeneous task-parallel runtime.
//!
//! A work-stealing scheduler ([`scheduler`]) runs [`task`]s organized into a dependency DAG and,
//! optionally, [`group`]s (a lattice of named task sets supporting cancellation and
//! intersection). [`pfor`] builds adaptive parallel-for and related patterns on top of the same
//! scheduler.
//!
//! ```no_run
//! weave_rt::runtime_init().unwrap();
//!
//! let t1 = weave_rt::create_task(weave_rt::TaskBody::Plain(Box::new(|| println!("t1"))));
//! let t2 = weave_rt::create_task(weave_rt::TaskBody::Plain(Box::new(|| println!("t2"))));
//! weave_rt::add_dependency(&t1, &t2);
//! weave_rt::launch(&t2, None);
//! weave_rt::launch(&t1, None);
//! weave_rt::wait_for(&t2);
//!
//! weave_rt::runtime_shutdown();
//! ```

mod bitmap;
mod cancel;
mod config;
mod deque;
mod error;
mod futex;
mod group;
mod id;
mod pfor;
mod queue;
mod runtime;
mod scheduler;
mod task;

pub use cancel::{abort_on_cancel, yield_now};
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::RuntimeError;
pub use group::{create_group, intersect, Group, GroupRef};
pub use id::Id;
pub use pfor::{pfor_each, preduce, pscan_inclusive, ptransform};
pub use runtime::{runtime_init, runtime_init_with, runtime_shutdown};
pub use scheduler::num_execution_contexts;
pub use task::{create_task, create_task_with, GpuCompletion, Header as Task, TaskAttrs, TaskBody, TaskRef};

/// Registers a predecessor → successor dependency edge (spec §6 `add_dependency`).
pub fn add_dependency(pred: &TaskRef, succ: &TaskRef) {
    Task::add_dependency(pred, succ);
}

/// Clears `UNLAUNCHED`, optionally joining `group` first, and dispatches `task` once it has no
/// outstanding predecessors (spec §6 `launch(task, group?)`).
pub fn launch(task: &TaskRef, group: Option<GroupRef>) {
    task.launch(group);
}

/// Fire-and-forget convenience: creates, optionally groups, and immediately launches a plain
/// task body (spec §6 `launch(group?, body)`).
pub fn spawn<F>(body: F, group: Option<GroupRef>) -> TaskRef
where
    F: FnOnce() + Send + 'static,
{
    let task = create_task(TaskBody::Plain(Box::new(body)));
    launch(&task, group);
    task
}

/// Either a [`TaskRef`] or a [`GroupRef`]: the target of [`cancel`] (spec §6 `cancel(task|group)`).
pub trait Cancelable: private::Sealed {
    fn cancel(&self);
}

impl Cancelable for TaskRef {
    fn cancel(&self) {
        Task::request_cancel(self);
    }
}

impl Cancelable for GroupRef {
    fn cancel(&self) {
        Group::cancel(self);
    }
}

/// Requests cancellation of a task or group (spec §6 `cancel(task|group)`).
pub fn cancel(target: &impl Cancelable) {
    target.cancel();
}

/// Either a [`TaskRef`] or a [`GroupRef`]: the target of [`wait_for`] (spec §6
/// `wait_for(task|group)`).
pub trait Waitable: private::Sealed {
    fn wait_for(&self);
}

impl Waitable for TaskRef {
    fn wait_for(&self) {
        task::wait(self);
    }
}

impl Waitable for GroupRef {
    fn wait_for(&self) {
        group::wait_for_group(self);
    }
}

/// Blocks the caller until a task or group has finished (spec §6 `wait_for(task|group)`).
pub fn wait_for(target: &impl Waitable) {
    target.wait_for();
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::TaskRef {}
    impl Sealed for super::GroupRef {}
}
