// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task state machine (C5): a single atomic word encoding lifecycle bits and the
//! predecessor count.
//!
//! ```text
//! | 63          29 | 28 ... 5 | 4         4 | 3       3 | 2     2 | 1           1 | 0           0 |
//! |     unused      |  preds   | cancel_req  | canceled  | done    |   running     |  unlaunched   |
//! ```
//!
//! Reference counting is *not* folded into this word (unlike the executor this design
//! generalizes): [`crate::task::TaskRef`] is a plain `Arc`, so ordinary Rust ownership already
//! gives us the "smart-pointer aliasing" story the design notes ask for, without an unsafe manual
//! refcount sharing the word with lifecycle bits.

use mycelium_bitfield::bitfield;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Max representable predecessor count. Exceeding this via `add_dependency` is an API violation
/// (fail-fast), not a recoverable error, mirroring the original's treatment of resource limits
/// baked into the fixed-width state word.
pub const MAX_PREDECESSORS: usize = (1 << 24) - 1;

bitfield! {
    /// A snapshot of a task's current lifecycle state.
    pub(crate) struct Snapshot<usize> {
        /// Set from creation until [`launch`](super::TaskRef::launch) clears it.
        pub(crate) const UNLAUNCHED: bool;
        /// Set while a worker is executing the task's body.
        pub(crate) const RUNNING: bool;
        /// Set once the body has returned normally. Terminal.
        pub(crate) const COMPLETED: bool;
        /// Set once the task has been canceled (either before it ran, or via `AbortTask`
        /// unwinding out of the body). Terminal.
        pub(crate) const CANCELED: bool;
        /// Set by [`cancel`](State::request_cancel); acknowledged at the next safe point.
        pub(crate) const CANCEL_REQ: bool;
        /// Number of not-yet-completed predecessors (`after(pred, self)` edges).
        pub(crate) const PREDS = 24;
    }
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchAction {
    /// Predecessor count is zero: submit the task to the scheduler now.
    Dispatch,
    /// Predecessors remain: the task will be dispatched when the last one completes.
    Wait,
    /// The task was already canceled (its `CANCEL_REQ` was set before it ever ran); it should be
    /// driven straight to `CANCELED` without ever touching the scheduler's run queues.
    DispatchCanceled,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimAction {
    /// Transition succeeded; the worker may run the body.
    Run,
    /// The task observed a cancel request before running; transition straight to `CANCELED`.
    RunCanceled,
    /// Another thread already claimed (or completed) this task; do nothing.
    Skip,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelAction {
    /// First cancellation; the task had not started running. Propagate immediately.
    NeverStarted,
    /// First cancellation; the task is currently running a blocking body — invoke its cancel
    /// handler.
    RunningBlocking,
    /// First cancellation; the task is running a non-blocking body — it will observe
    /// `CANCEL_REQ` at its next safe point.
    RunningPlain,
    /// The task was already canceled, or had already completed. No-op.
    AlreadyTerminal,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecrementAction {
    /// Predecessor count reached zero and the task is launched: dispatch it now.
    Dispatch,
    /// Predecessor count reached zero and the task is *not yet* launched: nothing to do until
    /// `launch` runs.
    StillUnlaunched,
    /// Predecessors remain.
    Pending,
}

pub(crate) struct State {
    val: AtomicUsize,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            val: AtomicUsize::new(Snapshot(0).with(Snapshot::UNLAUNCHED, true).0),
        }
    }

    pub(crate) fn load(&self, order: Ordering) -> Snapshot {
        Snapshot(self.val.load(order))
    }

    fn transition<T>(&self, mut f: impl FnMut(&mut Snapshot) -> T) -> T {
        let mut current = self.load(Ordering::Acquire);
        loop {
            let mut next = current;
            let result = f(&mut next);
            if current.0 == next.0 {
                return result;
            }
            match self.val.compare_exchange_weak(
                current.0,
                next.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return result,
                Err(actual) => current = Snapshot(actual),
            }
        }
    }

    /// Increments the predecessor count. Fails (returns `false`) if the task is no longer
    /// `UNLAUNCHED` — per spec, `add_dependency` is a precondition violation once `succ` has
    /// launched.
    pub(crate) fn try_add_predecessor(&self) -> bool {
        self.transition(|s| {
            if !s.get(Snapshot::UNLAUNCHED) {
                return false;
            }
            let preds = s.get(Snapshot::PREDS);
            assert!(preds < MAX_PREDECESSORS, "predecessor count overflow");
            s.set(Snapshot::PREDS, preds + 1);
            true
        })
    }

    /// Decrements the predecessor count (called when a predecessor of this task completes).
    pub(crate) fn decrement_predecessor(&self) -> DecrementAction {
        self.transition(|s| {
            let preds = s.get(Snapshot::PREDS);
            debug_assert!(preds > 0, "predecessor count underflow");
            s.set(Snapshot::PREDS, preds - 1);
            if preds - 1 != 0 {
                return DecrementAction::Pending;
            }
            if s.get(Snapshot::UNLAUNCHED) {
                DecrementAction::StillUnlaunched
            } else {
                DecrementAction::Dispatch
            }
        })
    }

    /// Clears `UNLAUNCHED`. Returns the action the caller (the public `launch` API) must take.
    pub(crate) fn launch(&self) -> LaunchAction {
        self.transition(|s| {
            debug_assert!(s.get(Snapshot::UNLAUNCHED), "task already launched");
            s.set(Snapshot::UNLAUNCHED, false);

            if s.get(Snapshot::CANCEL_REQ) {
                return LaunchAction::DispatchCanceled;
            }
            if s.get(Snapshot::PREDS) == 0 {
                LaunchAction::Dispatch
            } else {
                LaunchAction::Wait
            }
        })
    }

    /// Attempts to transition `READY -> RUNNING`. Exactly one concurrent caller succeeds with
    /// `Run`/`RunCanceled`; everyone else observes `Skip`.
    pub(crate) fn try_claim(&self) -> ClaimAction {
        self.transition(|s| {
            if s.get(Snapshot::RUNNING) || s.get(Snapshot::COMPLETED) || s.get(Snapshot::CANCELED)
            {
                return ClaimAction::Skip;
            }
            if s.get(Snapshot::CANCEL_REQ) {
                s.set(Snapshot::CANCELED, true);
                return ClaimAction::RunCanceled;
            }
            s.set(Snapshot::RUNNING, true);
            ClaimAction::Run
        })
    }

    /// Ends a run that was started with [`Self::try_claim`] returning `Run`.
    pub(crate) fn finish_run(&self, canceled: bool) {
        self.transition(|s| {
            debug_assert!(s.get(Snapshot::RUNNING));
            s.set(Snapshot::RUNNING, false);
            if canceled {
                s.set(Snapshot::CANCELED, true);
            } else {
                s.set(Snapshot::COMPLETED, true);
            }
        });
    }

    /// Requests cancellation. Idempotent: only the first caller gets a non-`AlreadyTerminal`
    /// action.
    pub(crate) fn request_cancel(&self, is_blocking: bool) -> CancelAction {
        self.transition(|s| {
            if s.get(Snapshot::COMPLETED) || s.get(Snapshot::CANCELED) {
                return CancelAction::AlreadyTerminal;
            }
            let already_requested = s.get(Snapshot::CANCEL_REQ);
            s.set(Snapshot::CANCEL_REQ, true);

            if s.get(Snapshot::RUNNING) {
                if already_requested {
                    return CancelAction::AlreadyTerminal;
                }
                return if is_blocking {
                    CancelAction::RunningBlocking
                } else {
                    CancelAction::RunningPlain
                };
            }

            if already_requested {
                return CancelAction::AlreadyTerminal;
            }
            // Not running yet (either still unlaunched, or launched but waiting on
            // predecessors/scheduler). It will never run; the caller drives it straight to
            // CANCELED.
            CancelAction::NeverStarted
        })
    }

    /// Used by the `NeverStarted` cancel path to mark the task terminal without it ever having
    /// run.
    pub(crate) fn cancel_without_running(&self) {
        self.transition(|s| {
            debug_assert!(!s.get(Snapshot::RUNNING));
            s.set(Snapshot::CANCELED, true);
        });
    }

    pub(crate) fn is_terminal(&self, snapshot: Snapshot) -> bool {
        snapshot.get(Snapshot::COMPLETED) || snapshot.get(Snapshot::CANCELED)
    }

    pub(crate) fn is_canceled(&self, order: Ordering) -> bool {
        self.load(order).get(Snapshot::CANCELED)
    }

    pub(crate) fn is_cancel_requested(&self, order: Ordering) -> bool {
        self.load(order).get(Snapshot::CANCEL_REQ)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_with_no_predecessors_dispatches() {
        let s = State::new();
        assert_eq!(s.launch(), LaunchAction::Dispatch);
    }

    #[test]
    fn launch_with_predecessors_waits_then_dispatches_on_last_decrement() {
        let s = State::new();
        assert!(s.try_add_predecessor());
        assert!(s.try_add_predecessor());
        assert_eq!(s.launch(), LaunchAction::Wait);
        assert_eq!(s.decrement_predecessor(), DecrementAction::Pending);
        assert_eq!(s.decrement_predecessor(), DecrementAction::Dispatch);
    }

    #[test]
    fn add_dependency_after_launch_fails() {
        let s = State::new();
        assert_eq!(s.launch(), LaunchAction::Dispatch);
        assert!(!s.try_add_predecessor());
    }

    #[test]
    fn cancel_before_launch_then_launch_dispatches_canceled() {
        let s = State::new();
        assert_eq!(s.request_cancel(false), CancelAction::NeverStarted);
        assert_eq!(s.launch(), LaunchAction::DispatchCanceled);
    }

    #[test]
    fn claim_run_and_finish() {
        let s = State::new();
        s.launch();
        assert_eq!(s.try_claim(), ClaimAction::Run);
        assert_eq!(s.try_claim(), ClaimAction::Skip);
        s.finish_run(false);
        assert!(s.load(Ordering::Acquire).get(Snapshot::COMPLETED));
    }

    #[test]
    fn cancel_is_idempotent() {
        let s = State::new();
        s.launch();
        s.try_claim();
        assert_eq!(s.request_cancel(false), CancelAction::RunningPlain);
        assert_eq!(s.request_cancel(false), CancelAction::AlreadyTerminal);
    }

    #[test]
    fn cancel_after_completion_is_noop() {
        let s = State::new();
        s.launch();
        s.try_claim();
        s.finish_run(false);
        assert_eq!(s.request_cancel(false), CancelAction::AlreadyTerminal);
    }
}
