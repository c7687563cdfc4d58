// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task bodies and attributes.
//!
//! The original selects between task variants (plain, blocking, GPU) via template
//! specialisation. We model that as a tagged enum instead; the scheduler matches on the tag.

use bitflags::bitflags;

bitflags! {
    /// Immutable attributes fixed at task creation. Mirrors the original's flag set; `GPU` is
    /// accepted for API compatibility with external GPU-dispatch callers but this crate does not
    /// itself schedule onto a device — see [`TaskBody::Gpu`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskAttrs: u16 {
        /// The body may block the OS thread; runs with a cancel handler, on a queue that does
        /// not starve other workers.
        const BLOCKING       = 1 << 0;
        /// Routed to the foreign queue rather than the submitter's local deque.
        const YIELD          = 1 << 1;
        /// Body enqueues GPU work and completes via an external completion callback.
        const GPU            = 1 << 2;
        /// Not reachable via any user-held handle; used for trigger tasks and pfor leaves.
        const ANONYMOUS      = 1 << 3;
        /// Intrusive-list stub node; never run.
        const STUB           = 1 << 4;
        /// `abort_on_cancel` and group cancellation are no-ops for this task.
        const NON_CANCELABLE = 1 << 5;
        /// Spawned by the adaptive pfor engine.
        const PFOR           = 1 << 6;
        /// Hint to the scheduler that this task is expected to run long; currently unused by the
        /// work-stealing policy but preserved for external callers that inspect attributes.
        const LONG_RUNNING   = 1 << 7;
    }
}

impl Default for TaskAttrs {
    fn default() -> Self {
        TaskAttrs::empty()
    }
}

/// A task's invocable body.
///
/// `Plain` bodies run to completion with no special handling. `Blocking` bodies additionally
/// carry a cancel handler invoked (at most once) by the cancellation engine while the body is
/// running, typically to signal an OS condition variable the body is waiting on. `Gpu` bodies
/// receive a [`GpuCompletion`] handle instead of running synchronously to completion; the task
/// stays `RUNNING` until the handle is completed from outside the scheduler (e.g. a device
/// completion interrupt).
pub enum TaskBody {
    Plain(Box<dyn FnOnce() + Send>),
    Blocking {
        run: Box<dyn FnOnce() + Send>,
        cancel_handler: Box<dyn Fn() + Send + Sync>,
    },
    Gpu(Box<dyn FnOnce(GpuCompletion) + Send>),
}

impl TaskBody {
    pub(crate) fn is_blocking(&self) -> bool {
        matches!(self, TaskBody::Blocking { .. })
    }
}

/// Handle passed to a [`TaskBody::Gpu`] body, used to signal completion from outside the
/// scheduler. Out of scope per spec §1 ("GPU/OpenCL dispatch ... specified only as the interfaces
/// the core consumes"): this crate defines the shape external GPU-dispatch callers drive, but does
/// not itself dispatch to a device.
pub struct GpuCompletion {
    pub(crate) task: super::TaskRef,
}

impl GpuCompletion {
    /// Drives the owning task to `COMPLETED` and runs its post-execution steps. Called by the
    /// external GPU dispatcher once the device-side kernel finishes.
    pub fn complete(self) {
        crate::task::finish_gpu_task(&self.task, false);
    }

    /// Drives the owning task to `CANCELED` instead, e.g. if the device reported an error after
    /// a cancellation was already requested.
    pub fn complete_canceled(self) {
        crate::task::finish_gpu_task(&self.task, true);
    }
}
