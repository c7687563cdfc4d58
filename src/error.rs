// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::fmt;

/// Fallible, non-API-violation outcomes.
///
/// API violations (null handle, double-launch, calling a runtime operation before
/// `runtime_init()`, `abort_on_cancel` outside a task, ...) are deliberately *not* members of
/// this enum: per the runtime's error-handling design, those stay fail-fast (a panic with a
/// pointed message in this implementation, since there is no caller left to hand a `Result` to
/// that hasn't already broken the "once per process, before anything else" contract) rather than
/// a recoverable variant, exactly like the system this runtime generalizes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("the runtime has already been initialized")]
    AlreadyInitialized,
    #[error("no free group-signature bits remain (hard ceiling reached)")]
    GroupBitsExhausted,
}

/// Internal sentinel raised by [`crate::abort_on_cancel`] (or implicitly by the scheduler
/// observing a pending cancel request) and caught around a task body via `catch_unwind`.
///
/// This is never surfaced to users; seeing it escape `catch_unwind` anywhere but the scheduler's
/// own dispatch loop is a bug in this crate.
pub(crate) struct AbortTask(());

impl AbortTask {
    pub(crate) fn raise() -> ! {
        std::panic::panic_any(AbortTask(()))
    }

    /// Returns `true` if a caught panic payload was an [`AbortTask`] sentinel.
    pub(crate) fn is_abort(payload: &(dyn Any + Send)) -> bool {
        payload.downcast_ref::<AbortTask>().is_some()
    }
}

impl fmt::Debug for AbortTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortTask")
    }
}
