// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Tasks (C5): reference-counted units of deferred work with a state machine, dependency edges,
//! and at most one group membership.

pub mod body;
pub(crate) mod state;

pub use body::{GpuCompletion, TaskAttrs, TaskBody};

use crate::group::GroupRef;
use crate::id::Id;
use state::{CancelAction, ClaimAction, DecrementAction, LaunchAction, Snapshot, State};

use crossbeam_utils::CachePadded;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};

/// The owning handle to a task. A plain `Arc`: see `DESIGN.md` for why this crate does not
/// replicate the teacher's manual vtable-erased refcounting.
pub type TaskRef = Arc<Header>;

/// A non-owning successor edge. Per spec §5, pending successor edges do not contribute to the
/// predecessor's refcount.
pub(crate) type WeakTaskRef = Weak<Header>;

pub(crate) enum RunBody {
    Plain(Box<dyn FnOnce() + Send>),
    Blocking(Box<dyn FnOnce() + Send>),
    Gpu(Box<dyn FnOnce(GpuCompletion) + Send>),
}

pub(crate) type Locals = HashMap<TypeId, Box<dyn Any + Send>>;

pub struct Header {
    id: Id,
    attrs: TaskAttrs,
    is_blocking: bool,
    state: CachePadded<State>,
    body: Mutex<Option<RunBody>>,
    cancel_handler: Option<Box<dyn Fn() + Send + Sync>>,
    successors: Mutex<Vec<WeakTaskRef>>,
    group: Mutex<Option<GroupRef>>,
    locals: Mutex<Locals>,
    waiters: Mutex<Vec<Arc<crate::futex::GroupWaiter>>>,
    span: tracing::Span,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id)
            .field("attrs", &self.attrs)
            .field("state", &self.state)
            .finish()
    }
}

/// Builds and creates a task. Mirrors the teacher's `TaskBuilder` (`libs/kasync/src/task/builder.rs`)
/// but over [`TaskBody`] rather than a `Future`.
pub fn create_task(body: TaskBody) -> TaskRef {
    create_task_with(body, TaskAttrs::empty())
}

/// As [`create_task`], with explicit attributes.
pub fn create_task_with(body: TaskBody, attrs: TaskAttrs) -> TaskRef {
    let id = Id::next();
    let is_blocking = body.is_blocking() || attrs.contains(TaskAttrs::BLOCKING);
    let (run, cancel_handler) = match body {
        TaskBody::Plain(f) => (RunBody::Plain(f), None),
        TaskBody::Blocking { run, cancel_handler } => {
            (RunBody::Blocking(run), Some(cancel_handler))
        }
        TaskBody::Gpu(f) => (RunBody::Gpu(f), None),
    };
    let span = tracing::trace_span!("task", task.id = id.as_u64(), task.kind = ?attrs);
    tracing::trace!(parent: &span, "task_created");

    Arc::new(Header {
        id,
        attrs,
        is_blocking,
        state: CachePadded::new(State::new()),
        body: Mutex::new(Some(run)),
        cancel_handler,
        successors: Mutex::new(Vec::new()),
        group: Mutex::new(None),
        locals: Mutex::new(HashMap::new()),
        waiters: Mutex::new(Vec::new()),
        span,
    })
}

/// Builds a stub task used only as an intrusive-list sentinel; never scheduled or run.
pub(crate) fn stub() -> TaskRef {
    Arc::new(Header {
        id: Id::stub(),
        attrs: TaskAttrs::STUB,
        is_blocking: false,
        state: CachePadded::new(State::new()),
        body: Mutex::new(None),
        cancel_handler: None,
        successors: Mutex::new(Vec::new()),
        group: Mutex::new(None),
        locals: Mutex::new(HashMap::new()),
        waiters: Mutex::new(Vec::new()),
        span: tracing::Span::none(),
    })
}

impl Header {
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub fn attrs(&self) -> TaskAttrs {
        self.attrs
    }

    pub(crate) fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn snapshot(&self, order: Ordering) -> Snapshot {
        self.state.load(order)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.snapshot(Ordering::Acquire).get(Snapshot::COMPLETED)
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        let snap = self.snapshot(Ordering::Acquire);
        self.state.is_terminal(snap)
    }

    /// Whether a cancellation has been requested (acknowledged or not). Used by
    /// [`crate::cancel::abort_on_cancel`].
    pub(crate) fn cancel_requested(&self) -> bool {
        self.state.is_cancel_requested(Ordering::Acquire)
    }

    /// Whether this task's current group (if any) has been cancelled. Used by
    /// [`crate::cancel::abort_on_cancel`].
    pub(crate) fn group_cancelled(&self) -> bool {
        self.group
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|g| g.is_cancelled())
    }

    /// Registers a predecessor→successor dependency edge: `succ` will not become eligible until
    /// `pred` completes or cancels. Fails (a fail-fast API violation, per spec §7) if `succ` is
    /// already launched.
    pub fn add_dependency(pred: &TaskRef, succ: &TaskRef) {
        if pred.is_canceled() {
            succ.request_cancel();
            return;
        }
        let ok = succ.state.try_add_predecessor();
        debug_assert!(ok, "add_dependency: successor already launched");
        if ok {
            pred.successors.lock().unwrap().push(Arc::downgrade(succ));
        }
    }

    /// Inserts `self` into `group`, replacing any prior membership. Fails silently (a no-op) if
    /// the task is already running or terminal, matching spec §4.4.
    pub fn join_group(self: &TaskRef, group: GroupRef) {
        let snap = self.snapshot(Ordering::Acquire);
        if snap.get(Snapshot::RUNNING) || self.state.is_terminal(snap) {
            return;
        }
        let mut slot = self.group.lock().unwrap();
        if let Some(old) = slot.take() {
            old.leave();
        }
        group.enter();
        group.register_member(self);
        *slot = Some(group);
    }

    /// Clears `UNLAUNCHED`, optionally joining `group` first, and dispatches the task if it has
    /// no outstanding predecessors.
    pub fn launch(self: &TaskRef, group: Option<GroupRef>) {
        if let Some(g) = group {
            self.join_group(g);
        }
        tracing::trace!(parent: self.span(), "task_launched");
        match self.state.launch() {
            LaunchAction::Dispatch => crate::scheduler::submit(self.clone()),
            LaunchAction::DispatchCanceled => self.finish_without_running(),
            LaunchAction::Wait => {}
        }
    }

    /// Requests cancellation. Idempotent; see `task/state.rs` for the full transition table.
    pub fn request_cancel(self: &TaskRef) {
        if self.attrs.contains(TaskAttrs::NON_CANCELABLE) {
            return;
        }
        match self.state.request_cancel(self.is_blocking) {
            CancelAction::NeverStarted => {
                self.state.cancel_without_running();
                self.finish_without_running();
            }
            CancelAction::RunningBlocking => {
                if let Some(handler) = &self.cancel_handler {
                    handler();
                }
            }
            CancelAction::RunningPlain | CancelAction::AlreadyTerminal => {}
        }
    }

    fn finish_without_running(self: &TaskRef) {
        tracing::trace!(parent: self.span(), canceled = true, "task_done");
        *self.body.lock().unwrap() = None;
        self.propagate_to_successors(true);
        self.leave_group();
        self.wake_waiters();
    }

    /// Claims the task (exactly one caller of [`Self::try_claim`] wins per task) and, depending
    /// on the outcome, either runs it or drives it straight to `CANCELED`. Called by the
    /// scheduler once it pops a task off a queue (spec §4.5 "Dispatch").
    pub(crate) fn dispatch(self: &TaskRef) {
        match self.try_claim() {
            ClaimAction::Run => self.run_and_finish(),
            ClaimAction::RunCanceled => {
                *self.body.lock().unwrap() = None;
                tracing::trace!(parent: self.span(), canceled = true, "task_done");
                self.propagate_to_successors(true);
                self.leave_group();
                self.wake_waiters();
            }
            ClaimAction::Skip => {}
        }
    }

    /// Runs the body (claimed by the scheduler via `try_claim`), then performs the
    /// post-execution steps. Not reentrant; call exactly once per successful `try_claim`.
    fn run_and_finish(self: &TaskRef) {
        let body = self.body.lock().unwrap().take();
        tracing::trace!(parent: self.span(), "task_executes");
        match body {
            None => {}
            Some(RunBody::Gpu(f)) => {
                // Stays RUNNING; `GpuCompletion::complete[_canceled]` finishes it later.
                f(GpuCompletion { task: self.clone() });
            }
            Some(RunBody::Plain(f)) | Some(RunBody::Blocking(f)) => {
                let _guard = crate::cancel::enter_task(self.clone());
                let canceled = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
                    Ok(()) => false,
                    Err(payload) => {
                        if !crate::error::AbortTask::is_abort(&*payload) {
                            std::panic::resume_unwind(payload);
                        }
                        true
                    }
                };
                drop(_guard);
                self.finish_and_propagate(canceled);
            }
        }
    }

    fn finish_and_propagate(self: &TaskRef, canceled: bool) {
        self.state.finish_run(canceled);
        tracing::trace!(parent: self.span(), canceled, "task_done");
        self.propagate_to_successors(canceled);
        self.leave_group();
        self.wake_waiters();
    }

    pub(crate) fn register_waiter(self: &TaskRef, waiter: Arc<crate::futex::GroupWaiter>) {
        let mut list = self.waiters.lock().unwrap();
        if self.is_terminal() {
            drop(list);
            waiter.signal();
        } else {
            list.push(waiter);
        }
    }

    fn wake_waiters(self: &TaskRef) {
        let list = std::mem::take(&mut *self.waiters.lock().unwrap());
        for w in list {
            w.signal();
        }
    }

    fn propagate_to_successors(self: &TaskRef, canceled: bool) {
        let succs = std::mem::take(&mut *self.successors.lock().unwrap());
        for weak in succs {
            let Some(succ) = weak.upgrade() else {
                continue;
            };
            if canceled {
                succ.request_cancel();
            }
            if let DecrementAction::Dispatch = succ.state.decrement_predecessor() {
                crate::scheduler::submit(succ);
            }
        }
    }

    fn leave_group(self: &TaskRef) {
        if let Some(g) = self.group.lock().unwrap().take() {
            g.leave();
        }
    }

    /// Called by the scheduler once it has claimed the task for execution (`try_claim` returned
    /// `Run`/`RunCanceled`).
    pub(crate) fn try_claim(&self) -> ClaimAction {
        self.state.try_claim()
    }

    pub(crate) fn set_local<T: Any + Send>(&self, value: T) {
        self.locals
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub(crate) fn get_local<T: Any + Send + Clone>(&self) -> Option<T> {
        self.locals
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

/// Finishes a [`GpuCompletion`]-driven task from outside the scheduler's own dispatch loop.
pub(crate) fn finish_gpu_task(task: &TaskRef, canceled: bool) {
    task.finish_and_propagate(canceled);
}

/// Blocks the caller until `task` is terminal. From inside a task, this yields the worker to
/// other ready work rather than parking the OS thread; see `crate::futex`.
pub fn wait(task: &TaskRef) {
    crate::futex::block_until(task.clone(), |t: &TaskRef| t.is_terminal(), Header::register_waiter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn stub_is_never_runnable() {
        let t = stub();
        assert!(t.attrs().contains(TaskAttrs::STUB));
        assert!(!t.is_terminal());
    }

    #[test]
    fn locals_round_trip() {
        let t = create_task(TaskBody::Plain(Box::new(|| {})));
        t.set_local(42i32);
        assert_eq!(t.get_local::<i32>(), Some(42));
        assert_eq!(t.get_local::<u8>(), None);
    }

    #[test]
    fn add_dependency_bumps_predecessor_count() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = counter.clone();
        let pred = create_task(TaskBody::Plain(Box::new(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        })));
        let succ = create_task(TaskBody::Plain(Box::new(|| {})));
        Header::add_dependency(&pred, &succ);
        assert_eq!(
            succ.snapshot(Ordering::Acquire).get(Snapshot::PREDS),
            1
        );
    }
}
