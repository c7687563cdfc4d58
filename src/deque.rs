// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler's per-worker bounded double-ended queue (C1).
//!
//! See `SPEC_FULL.md` §9 for why this is a `Mutex`-guarded ring rather than the original's
//! lock-free tagged-node algorithm: stable `std` has no portable double-machine-word CAS, and the
//! spec explicitly permits a lock-based fallback with equivalent semantics. The owner end (used
//! by the worker that owns this queue) is the right/back end; thieves take from the left/front
//! end, so a worker's own pushes and pops behave like a stack (depth-first, cache-friendly) while
//! steals drain the oldest-pushed entries first.

use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) struct Deque<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
}

impl<T> Deque<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Pushes at the owner's end. Returns `v` back on `Err` if the deque is at capacity.
    pub(crate) fn push_right(&self, v: T) -> Result<(), T> {
        let mut g = self.inner.lock().unwrap();
        if g.len() >= self.capacity {
            return Err(v);
        }
        g.push_back(v);
        Ok(())
    }

    /// Pushes at the thieves' end. Returns `v` back on `Err` if the deque is at capacity.
    pub(crate) fn push_left(&self, v: T) -> Result<(), T> {
        let mut g = self.inner.lock().unwrap();
        if g.len() >= self.capacity {
            return Err(v);
        }
        g.push_front(v);
        Ok(())
    }

    /// Pops from the owner's end.
    pub(crate) fn pop_right(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_back()
    }

    /// Pops from the thieves' end.
    pub(crate) fn pop_left(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_end_is_lifo() {
        let d: Deque<i32> = Deque::new(8);
        d.push_right(1).unwrap();
        d.push_right(2).unwrap();
        d.push_right(3).unwrap();
        assert_eq!(d.pop_right(), Some(3));
        assert_eq!(d.pop_right(), Some(2));
        assert_eq!(d.pop_right(), Some(1));
        assert_eq!(d.pop_right(), None);
    }

    #[test]
    fn thief_end_is_fifo_relative_to_owner_pushes() {
        let d: Deque<i32> = Deque::new(8);
        d.push_right(1).unwrap();
        d.push_right(2).unwrap();
        d.push_right(3).unwrap();
        assert_eq!(d.pop_left(), Some(1));
        assert_eq!(d.pop_left(), Some(2));
        assert_eq!(d.pop_left(), Some(3));
    }

    #[test]
    fn push_fails_at_capacity() {
        let d: Deque<i32> = Deque::new(2);
        d.push_right(1).unwrap();
        d.push_right(2).unwrap();
        assert_eq!(d.push_right(3), Err(3));
    }

    proptest::proptest! {
        #[test]
        fn push_right_pop_right_preserves_count(values in proptest::collection::vec(0i32..1000, 0..64)) {
            let d: Deque<i32> = Deque::new(values.len().max(1));
            let mut pushed = 0;
            for v in &values {
                if d.push_right(*v).is_ok() {
                    pushed += 1;
                }
            }
            let mut popped = 0;
            while d.pop_right().is_some() {
                popped += 1;
            }
            proptest::prop_assert_eq!(pushed, popped);
        }
    }
}
