// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `abort_on_cancel` / `yield_now` (part of C8): the safe points a running task body calls to
//! cooperatively observe a pending cancellation.
//!
//! Most of the cancellation engine (group-cancel propagation, task-cancel propagation to
//! successors, the blocking-task handler race) lives next to the state it acts on — see
//! `group.rs::Group::cancel` and `task/mod.rs::Header::request_cancel`. What's left here is the
//! thread-local "what task is currently running on this worker" bookkeeping those safe points
//! need, which has no home in either of those modules since it's a property of the *calling
//! thread*, not of any one task or group.

use crate::task::TaskRef;

use std::cell::RefCell;

thread_local! {
    static CURRENT_TASK: RefCell<Option<TaskRef>> = const { RefCell::new(None) };
}

/// Installed around a task body's execution (`task/mod.rs::Header::run_and_finish`) so
/// [`current_task`] resolves correctly for the duration of the call, including through nested
/// calls back into the runtime (e.g. a pfor leaf spawning further tasks).
pub(crate) struct TaskGuard {
    prev: Option<TaskRef>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|c| *c.borrow_mut() = self.prev.take());
    }
}

pub(crate) fn enter_task(task: TaskRef) -> TaskGuard {
    let prev = CURRENT_TASK.with(|c| c.borrow_mut().replace(task));
    TaskGuard { prev }
}

/// The task currently running on the calling thread's worker, if any.
pub(crate) fn current_task() -> Option<TaskRef> {
    CURRENT_TASK.with(|c| c.borrow().clone())
}

/// Checks whether the currently running task — or the group it belongs to — has a pending
/// cancellation and, if so, raises the internal [`crate::error::AbortTask`] sentinel, unwinding
/// out of the task body. The scheduler catches the sentinel in
/// `task/mod.rs::Header::run_and_finish` and transitions the task to `CANCELED`.
///
/// Must be called from within a task (spec §4.4). Calling it elsewhere is an API violation: per
/// spec §7 ("fail-fast in debug, undefined in release"), this `debug_assert!`s in debug builds
/// and is simply a no-op in release, since there is no task state this crate could otherwise
/// touch on its behalf.
pub fn abort_on_cancel() {
    let Some(task) = current_task() else {
        debug_assert!(false, "abort_on_cancel() called outside a running task");
        return;
    };
    if task.cancel_requested() || task.group_cancelled() {
        crate::error::AbortTask::raise();
    }
}

/// A cooperative safe point (spec §5 "Suspension points"). Outside a task this is a no-op.
///
/// The original's `yield()` additionally gives other ready work a chance to run on the calling
/// worker; this runtime's task bodies run to completion rather than being resumable mid-body (see
/// `DESIGN.md`'s "Deviation: `Arc` instead of manual vtable refcounting" note), so there is no
/// continuation to suspend here — `yield_now` degrades to the cancellation recheck that is the
/// other half of being a safe point.
pub fn yield_now() {
    if current_task().is_some() {
        abort_on_cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{create_task, TaskBody};

    #[test]
    fn current_task_is_none_outside_a_task() {
        assert!(current_task().is_none());
    }

    #[test]
    fn guard_restores_previous_task_on_drop() {
        let outer = create_task(TaskBody::Plain(Box::new(|| {})));
        let _outer_guard = enter_task(outer.clone());
        assert_eq!(current_task().unwrap().id(), outer.id());
        {
            let inner = create_task(TaskBody::Plain(Box::new(|| {})));
            let _inner_guard = enter_task(inner.clone());
            assert_eq!(current_task().unwrap().id(), inner.id());
        }
        assert_eq!(current_task().unwrap().id(), outer.id());
    }

    #[test]
    fn yield_now_outside_a_task_is_a_noop() {
        yield_now();
    }
}
