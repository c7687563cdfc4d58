// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime lifecycle (C1): `runtime_init`/`runtime_init_with`/`runtime_shutdown`, the three
//! entry points every other module's "is the runtime up?" assumption depends on.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

use std::sync::OnceLock;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initializes the global runtime with [`RuntimeConfig::from_env`]. Must be called exactly once
/// per process, before any other runtime API (spec §6).
///
/// # Errors
///
/// Returns [`RuntimeError::AlreadyInitialized`] if called more than once.
pub fn runtime_init() -> Result<(), RuntimeError> {
    runtime_init_with(RuntimeConfig::from_env())
}

/// As [`runtime_init`], with an explicit [`RuntimeConfig`] rather than one read from the
/// environment.
///
/// # Errors
///
/// Returns [`RuntimeError::AlreadyInitialized`] if called more than once.
pub fn runtime_init_with(config: RuntimeConfig) -> Result<(), RuntimeError> {
    INITIALIZED
        .set(())
        .map_err(|()| RuntimeError::AlreadyInitialized)?;
    tracing::info!(
        workers = config.worker_count(),
        max_idle = config.max_idle_threads(),
        deque_capacity = config.deque_capacity(),
        "runtime_init"
    );
    crate::scheduler::init(config);
    Ok(())
}

/// Stops every worker thread and drains the run queues. A no-op if the runtime was never
/// initialized. Not required before process exit; provided for embedders and tests that need a
/// clean teardown (spec §6).
pub fn runtime_shutdown() {
    tracing::info!("runtime_shutdown");
    crate::scheduler::shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `runtime_init` can only genuinely succeed once per process (the global `OnceLock` backing
    /// it is shared by every test in this binary), so this only exercises the "already
    /// initialized" rejection path, not a virgin first call — `tests/e2e.rs` covers that via its
    /// own `Once`-guarded setup.
    #[test]
    fn second_init_is_rejected_once_first_succeeds() {
        let _ = runtime_init_with(RuntimeConfig::builder().worker_count(1).build());
        let err = runtime_init_with(RuntimeConfig::builder().worker_count(1).build());
        assert!(matches!(err, Err(RuntimeError::AlreadyInitialized)));
    }
}
