// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime configuration, read from the environment or built programmatically.
//!
//! Recognised environment variables (see spec §6):
//!
//! | Option | Env var | Default |
//! |---|---|---|
//! | worker count | `WEAVE_WORKER_COUNT` | detected CPU cores |
//! | max idle threads | `WEAVE_MAX_IDLE_THREADS` | = worker count |
//! | deque capacity | `WEAVE_DEQUE_CAPACITY` | 256 |
//! | pfor block size | `WEAVE_PFOR_BLOCK_SIZE` | 1 |

use std::env;

const DEFAULT_DEQUE_CAPACITY: usize = 256;
const DEFAULT_PFOR_BLOCK_SIZE: usize = 1;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub(crate) worker_count: usize,
    pub(crate) max_idle_threads: usize,
    pub(crate) deque_capacity: usize,
    pub(crate) pfor_block_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let worker_count = num_cpus::get();
        Self {
            worker_count,
            max_idle_threads: worker_count,
            deque_capacity: DEFAULT_DEQUE_CAPACITY,
            pfor_block_size: DEFAULT_PFOR_BLOCK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Construct a config from `WEAVE_*` environment variables, falling back to defaults for
    /// anything unset or unparseable (a malformed value is logged, not fatal).
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = Self::parse_env("WEAVE_WORKER_COUNT") {
            cfg.worker_count = v;
        }
        cfg.max_idle_threads = cfg.worker_count;
        if let Some(v) = Self::parse_env("WEAVE_MAX_IDLE_THREADS") {
            cfg.max_idle_threads = v;
        }
        if let Some(v) = Self::parse_env("WEAVE_DEQUE_CAPACITY") {
            cfg.deque_capacity = v;
        }
        if let Some(v) = Self::parse_env("WEAVE_PFOR_BLOCK_SIZE") {
            cfg.pfor_block_size = v;
        }

        cfg
    }

    fn parse_env(key: &str) -> Option<usize> {
        let raw = env::var(key).ok()?;
        match raw.parse::<usize>() {
            Ok(v) if v > 0 => Some(v),
            _ => {
                tracing::warn!(key, raw, "ignoring malformed or zero config value");
                None
            }
        }
    }

    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder(Self::default())
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[must_use]
    pub fn max_idle_threads(&self) -> usize {
        self.max_idle_threads
    }

    #[must_use]
    pub fn deque_capacity(&self) -> usize {
        self.deque_capacity
    }

    #[must_use]
    pub fn pfor_block_size(&self) -> usize {
        self.pfor_block_size
    }
}

/// Programmatic builder for [`RuntimeConfig`], for embedders that don't want to go through
/// environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder(RuntimeConfig);

impl RuntimeConfigBuilder {
    #[must_use]
    pub fn worker_count(mut self, n: usize) -> Self {
        self.0.worker_count = n;
        self
    }

    #[must_use]
    pub fn max_idle_threads(mut self, n: usize) -> Self {
        self.0.max_idle_threads = n;
        self
    }

    #[must_use]
    pub fn deque_capacity(mut self, n: usize) -> Self {
        self.0.deque_capacity = n;
        self
    }

    #[must_use]
    pub fn pfor_block_size(mut self, n: usize) -> Self {
        self.0.pfor_block_size = n;
        self
    }

    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.worker_count() >= 1);
        assert_eq!(cfg.max_idle_threads(), cfg.worker_count());
        assert_eq!(cfg.deque_capacity(), DEFAULT_DEQUE_CAPACITY);
        assert_eq!(cfg.pfor_block_size(), DEFAULT_PFOR_BLOCK_SIZE);
    }

    #[test]
    fn builder_overrides() {
        let cfg = RuntimeConfig::builder()
            .worker_count(4)
            .deque_capacity(64)
            .pfor_block_size(16)
            .build();
        assert_eq!(cfg.worker_count(), 4);
        assert_eq!(cfg.deque_capacity(), 64);
        assert_eq!(cfg.pfor_block_size(), 16);
    }
}
