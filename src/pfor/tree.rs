// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The adaptive work-stealing tree (C9) behind [`super::pfor_each`]/[`super::ptransform`].
//!
//! A node owns a half-open range `[first, end)` (the original's closed `[first, last]`, shifted
//! by one: half-open ranges compose without the `+1`/`-1` bookkeeping the closed form needs at
//! every split and termination check). `progress` walks up from `first` to `end` in blocks of
//! `blk`; a stealer instead CASes it to [`STOLEN`], carving the unworked tail `[progress, end)`
//! into a left half the original owner continues into and a right half the stealer claims for
//! itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// `progress` has not yet been claimed by the owner (`try_own` not yet called).
const UNCLAIMED: usize = usize::MAX;
/// `progress` was claimed by a stealer splitting this node; `left`/`right` hold the two halves.
const STOLEN: usize = usize::MAX - 1;

pub(crate) struct Node {
    first: usize,
    end: usize,
    progress: AtomicUsize,
    left: OnceLock<Box<Node>>,
    right: OnceLock<Box<Node>>,
    /// Per-child visit counters consulted by [`find_work`] to bias later thieves away from
    /// subtrees earlier thieves already explored.
    visits: [AtomicUsize; 2],
}

impl Node {
    fn unclaimed(first: usize, end: usize) -> Self {
        Self {
            first,
            end,
            progress: AtomicUsize::new(UNCLAIMED),
            left: OnceLock::new(),
            right: OnceLock::new(),
            visits: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    fn owned(first: usize, end: usize) -> Self {
        let node = Self::unclaimed(first, end);
        node.progress.store(first, Ordering::Relaxed);
        node
    }

    pub(crate) fn root(first: usize, end: usize) -> Node {
        Node::owned(first, end)
    }

    /// Claims an `UNCLAIMED` node for the calling worker. Returns `false` if another thread beat
    /// us to it (only possible for a root handed out by [`find_work`], never for a freshly split
    /// child, which is always claimed synchronously by its creator).
    fn try_own(&self) -> bool {
        self.progress
            .compare_exchange(UNCLAIMED, self.first, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_stolen(&self) -> bool {
        self.progress.load(Ordering::Acquire) == STOLEN
    }

    /// `true` once this node's range (and both children, if it was split) has been fully worked.
    pub(crate) fn is_complete(&self) -> bool {
        match self.progress.load(Ordering::Acquire) {
            STOLEN => match (self.left.get(), self.right.get()) {
                (Some(l), Some(r)) => l.is_complete() && r.is_complete(),
                _ => false,
            },
            UNCLAIMED => false,
            p => p >= self.end,
        }
    }

    /// Attempts to steal the unworked tail of `self`. On success, splits `[progress, end)` into
    /// `left = [progress, mid)` (left unclaimed, for the original owner to continue into once it
    /// notices the steal) and `right = [mid, end)` (claimed immediately by the stealer and
    /// returned).
    ///
    /// Fails (returns `None`) if the node is already complete, already stolen, or a concurrent
    /// steal attempt won the race.
    fn try_steal(&self) -> Option<&Node> {
        loop {
            let progress = self.progress.load(Ordering::Acquire);
            if progress == STOLEN || progress >= self.end {
                return None;
            }
            if self
                .progress
                .compare_exchange(progress, STOLEN, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            let mid = progress + (self.end - progress) / 2;
            self.left.get_or_init(|| Box::new(Node::unclaimed(progress, mid)));
            let right = self
                .right
                .get_or_init(|| Box::new(Node::owned(mid, self.end)));
            return Some(right);
        }
    }

    /// Runs a single block `[i, i+blk)` worth of work, advancing `progress` by CAS. Returns
    /// `true` if a block ran, `false` if the node is exhausted or was stolen out from under the
    /// caller (in either case the caller should stop driving this node).
    fn work_one_block(&self, blk: usize, f: &(dyn Fn(usize, usize) + Sync)) -> bool {
        let progress = self.progress.load(Ordering::Acquire);
        if progress == STOLEN || progress >= self.end {
            return false;
        }
        let next = (progress + blk).min(self.end);
        f(progress, next);
        self.progress
            .compare_exchange(progress, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drives `self` to completion, one block at a time, descending into the left half left
    /// behind by a steal once one is observed. `self` must already be owned (`try_own` succeeded,
    /// or this is a freshly split child already claimed by its creator).
    pub(crate) fn drive(&self, blk: usize, f: &(dyn Fn(usize, usize) + Sync)) {
        let mut node = self;
        loop {
            while node.work_one_block(blk, f) {}
            if node.progress.load(Ordering::Acquire) != STOLEN {
                // Really done: `work_one_block` only stops short of `STOLEN` once
                // `progress >= end`.
                return;
            }
            // A steal happened underneath us: spin briefly for the stealer to publish `left`
            // (a handful of atomic stores away), then race any thief reaching it through
            // `find_work` to claim it ourselves.
            let left = loop {
                if let Some(left) = node.left.get() {
                    break left;
                }
                std::hint::spin_loop();
            };
            if !left.try_own() {
                return;
            }
            node = left;
        }
    }

    /// Finds an unclaimed or partially-worked node reachable from `self` for a would-be thief to
    /// take, biasing descent away from whichever child has already been visited more (spec
    /// §4.8's "so later thieves diverge from earlier thieves").
    pub(crate) fn find_work(&self) -> Option<&Node> {
        if self.is_complete() {
            return None;
        }
        if self.progress.load(Ordering::Acquire) == UNCLAIMED {
            // Either a fresh root handed out for the first time, or the left half a steal left
            // behind for its original owner to reclaim; race them for it. Losing means it's
            // already spoken for and has no children of its own to search further.
            return self.try_own().then_some(self);
        }
        if !self.is_stolen() {
            return self.try_steal();
        }

        let left = self.left.get()?;
        let right = self.right.get()?;
        let lv = self.visits[0].load(Ordering::Relaxed);
        let rv = self.visits[1].load(Ordering::Relaxed);
        let (first, first_idx, second, second_idx) = if lv <= rv {
            (left, 0, right, 1)
        } else {
            (right, 1, left, 0)
        };
        self.visits[first_idx].fetch_add(1, Ordering::Relaxed);
        if let Some(found) = first.find_work() {
            return Some(found);
        }
        self.visits[second_idx].fetch_add(1, Ordering::Relaxed);
        second.find_work()
    }
}

/// `ceil(log2(n))` without floating point, to size the pre-split (spec §4.8: "build the first
/// `ceil(log2(max_tasks))` levels eagerly").
pub(crate) fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        return 0;
    }
    (n - 1).ilog2() + 1
}

/// One step of a [`pre_split`] traversal path: which child a path continues into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dir {
    Left,
    Right,
}

/// Eagerly splits `node` up to `levels` deep (no CAS needed: this runs before any worker has
/// started driving the tree), recording the root-to-leaf path of each resulting leaf in `out`, in
/// left-to-right order. A subtree stops splitting early, short of `levels`, once its range drops
/// below 2 elements, so `out.len()` may be less than `2.pow(levels)` — every leaf `pre_split`
/// produces is a genuinely distinct, indivisible range, never a duplicate.
///
/// Paths (not node references) are what callers keep: a path can be handed to a `'static` task
/// body and walked again later with [`navigate`], once that task is actually running on its own
/// worker thread.
pub(crate) fn pre_split(node: &Node, levels: u32, path: &mut Vec<Dir>, out: &mut Vec<Vec<Dir>>) {
    if levels == 0 || node.end - node.first < 2 {
        out.push(path.clone());
        return;
    }
    let mid = node.first + (node.end - node.first) / 2;
    let left = node.left.get_or_init(|| Box::new(Node::owned(node.first, mid)));
    let right = node.right.get_or_init(|| Box::new(Node::owned(mid, node.end)));
    node.progress.store(STOLEN, Ordering::Release);

    path.push(Dir::Left);
    pre_split(left, levels - 1, path, out);
    path.pop();

    path.push(Dir::Right);
    pre_split(right, levels - 1, path, out);
    path.pop();
}

/// Walks `path` from `node`, returning the node it leads to. `path` must have come from
/// [`pre_split`] run on this same tree.
pub(crate) fn navigate<'a>(node: &'a Node, path: &[Dir]) -> &'a Node {
    let mut node = node;
    for dir in path {
        node = match dir {
            Dir::Left => node.left.get(),
            Dir::Right => node.right.get(),
        }
        .expect("path produced by pre_split on this tree");
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as AU;
    use std::sync::Mutex;

    #[test]
    fn single_owner_drives_whole_range_without_steals() {
        let root = Node::root(0, 100);
        let seen = Mutex::new(Vec::new());
        root.drive(7, &|lo, hi| seen.lock().unwrap().push((lo, hi)));
        assert!(root.is_complete());
        let seen = seen.into_inner().unwrap();
        let mut covered = vec![false; 100];
        for (lo, hi) in seen {
            for i in lo..hi {
                assert!(!covered[i], "index {i} visited twice");
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn steal_splits_unworked_tail_and_both_halves_complete() {
        let root = Node::root(0, 100);
        root.progress.store(90, Ordering::Relaxed);
        let right = root.try_steal().expect("tail is unworked, steal should succeed");
        assert!(right.first <= 100 && right.progress.load(Ordering::Acquire) == right.first);
        let left = root.left.get().unwrap();
        assert_eq!(left.first, 90);
        assert!(left.try_own(), "the original owner must claim its abandoned half");

        let count = AU::new(0);
        left.drive(1, &|lo, hi| {
            count.fetch_add(hi - lo, Ordering::Relaxed);
        });
        right.drive(1, &|lo, hi| {
            count.fetch_add(hi - lo, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 10);
        assert!(root.is_complete());
    }

    #[test]
    fn try_steal_fails_once_fully_worked() {
        let root = Node::root(0, 4);
        root.drive(1, &|_, _| {});
        assert!(root.try_steal().is_none());
    }

    #[test]
    fn drive_resumes_into_left_half_after_a_steal() {
        let root = Node::root(0, 100);
        root.progress.store(90, Ordering::Relaxed);
        let right = root.try_steal().expect("tail is unworked, steal should succeed");

        let count = AU::new(0);
        // Drain the stolen right half out of band, as a concurrent thief would.
        right.drive(1, &|lo, hi| {
            count.fetch_add(hi - lo, Ordering::Relaxed);
        });
        // The owner's own `drive` call on `root` must notice the steal and descend into the
        // abandoned left half itself rather than stopping short of it.
        root.drive(1, &|lo, hi| {
            count.fetch_add(hi - lo, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 10);
        assert!(root.is_complete());
    }

    #[test]
    fn only_one_claimant_can_own_an_abandoned_left_half() {
        let root = Node::root(0, 100);
        root.progress.store(90, Ordering::Relaxed);
        let _right = root.try_steal().expect("tail is unworked, steal should succeed");
        let left = root.left.get().unwrap();
        assert!(left.try_own());
        assert!(!left.try_own(), "a second claim of the same node must fail");
    }

    #[test]
    fn find_work_can_claim_an_abandoned_left_half() {
        let root = Node::root(0, 100);
        root.progress.store(90, Ordering::Relaxed);
        let _right = root.try_steal().expect("tail is unworked, steal should succeed");

        let found = root.find_work().expect("the abandoned left half is reachable");
        assert_eq!(found.first, 90);
        assert_eq!(found.progress.load(Ordering::Acquire), 90);
    }

    #[test]
    fn ceil_log2_matches_expected_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
    }

    #[test]
    fn pre_split_produces_power_of_two_leaves_covering_the_range() {
        let root = Node::root(0, 16);
        let mut paths = Vec::new();
        pre_split(&root, 2, &mut Vec::new(), &mut paths);
        assert_eq!(paths.len(), 4);
        let count = AU::new(0);
        for path in &paths {
            navigate(&root, path).drive(1, &|lo, hi| {
                count.fetch_add(hi - lo, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 16);
        assert!(root.is_complete());
    }

    #[test]
    fn pre_split_stops_early_once_a_subtree_drops_below_two_elements() {
        let root = Node::root(0, 3);
        let mut paths = Vec::new();
        pre_split(&root, 3, &mut Vec::new(), &mut paths);
        // 2^3 = 8 requested leaves, but a 3-element range can only ever produce 3 distinct,
        // indivisible leaves; no path should be duplicated.
        assert_eq!(paths.len(), 3);
        let mut seen = std::collections::HashSet::new();
        for path in &paths {
            let leaf = navigate(&root, path);
            assert!(seen.insert((leaf.first, leaf.end)), "leaf {:?} assigned twice", (leaf.first, leaf.end));
        }
        let count = AU::new(0);
        for path in &paths {
            navigate(&root, path).drive(1, &|lo, hi| {
                count.fetch_add(hi - lo, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert!(root.is_complete());
    }
}
