// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Groups (C3/C4): named sets of tasks, organized into a lattice ordered by signature subset,
//! with lazily materialized intersection ("meet") groups.

use crate::bitmap::{BitAllocator, Signature};
use crate::futex::GroupWaiter;
use crate::id::Id;
use crate::task::TaskRef;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

pub type GroupRef = Arc<Group>;

pub struct Group {
    id: Id,
    name: Option<String>,
    sig: Signature,
    /// Number of tasks currently, directly, members of this group (or of a descendant meet — see
    /// `enter`/`leave`, which roll the count up to every ancestor in one step rather than
    /// maintaining a separate per-child sum, per spec §4.3's "sum of descendants" invariant).
    tasks: AtomicUsize,
    cancelled: AtomicBool,
    members: Mutex<HashMap<Id, Weak<crate::task::Header>>>,
    waiters: Mutex<Vec<Arc<GroupWaiter>>>,
    /// Every group, live at this group's creation, whose signature is a strict subset of this
    /// one's. See the lattice note below for why a flat scan at creation time is sufficient.
    ancestors: Vec<GroupRef>,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sig", &self.sig)
            .field("tasks", &self.tasks.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Group {
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub fn signature(&self) -> Signature {
        self.sig
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Called when a task joins this group. Rolls the increment up through every ancestor, per
    /// the "tasks(G) == sum of descendants' tasks" invariant.
    pub(crate) fn enter(self: &GroupRef) {
        self.tasks.fetch_add(1, Ordering::AcqRel);
        for a in &self.ancestors {
            a.tasks.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn register_member(self: &GroupRef, task: &TaskRef) {
        self.members
            .lock()
            .unwrap()
            .insert(task.id(), Arc::downgrade(task));
    }

    /// Called when a task leaves this group (completion, cancellation, or re-joining elsewhere).
    pub(crate) fn leave(self: &GroupRef) {
        self.tasks.fetch_sub(1, Ordering::AcqRel);
        if self.tasks.load(Ordering::Acquire) == 0 {
            self.wake_waiters();
        }
        for a in &self.ancestors {
            a.tasks.fetch_sub(1, Ordering::AcqRel);
            if a.tasks.load(Ordering::Acquire) == 0 {
                a.wake_waiters();
            }
        }
    }

    /// Sets the cancelled bit on `self` and every descendant (every live group whose signature is
    /// a superset of this one's), then cancels every not-yet-terminal member task of each.
    pub fn cancel(self: &GroupRef) {
        let lattice = Lattice::global();
        let groups = lattice.groups.lock().unwrap();
        let descendants: Vec<GroupRef> = groups
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|g| self.sig.subset_of(&g.sig))
            .collect();
        drop(groups);

        for g in descendants {
            g.cancelled.store(true, Ordering::SeqCst);
            let members: Vec<TaskRef> = g
                .members
                .lock()
                .unwrap()
                .values()
                .filter_map(Weak::upgrade)
                .collect();
            for t in members {
                t.request_cancel();
            }
        }
    }

    pub(crate) fn register_waiter(self: &GroupRef, waiter: Arc<GroupWaiter>) {
        let mut list = self.waiters.lock().unwrap();
        if self.is_empty() {
            drop(list);
            waiter.signal();
        } else {
            list.push(waiter);
        }
    }

    fn wake_waiters(self: &GroupRef) {
        let list = std::mem::take(&mut *self.waiters.lock().unwrap());
        for w in list {
            w.signal();
        }
    }
}

/// The group lattice directory. A single global instance, protected by one mutex (spec §4.3:
/// "all under one global mutex").
///
/// `groups`/`meet_db` hold [`Weak`] handles, not [`GroupRef`]s: a group's only *strong* owners are
/// whoever holds its `GroupRef` directly and any descendant group's `ancestors` list (spec §4.3
/// "destruction ... removes it from all parents' children lists"). A dead entry is simply one that
/// fails to upgrade; it is pruned lazily, on the next lookup that passes over it.
pub(crate) struct Lattice {
    groups: Mutex<Vec<Weak<Group>>>,
    bits: Mutex<BitAllocator>,
    meet_db: Mutex<HashMap<Signature, Weak<Group>>>,
}

static LATTICE: OnceLock<Lattice> = OnceLock::new();

impl Lattice {
    pub(crate) fn global() -> &'static Lattice {
        LATTICE.get_or_init(|| Lattice {
            groups: Mutex::new(Vec::new()),
            bits: Mutex::new(BitAllocator::new()),
            meet_db: Mutex::new(HashMap::new()),
        })
    }

    fn ancestors_of(&self, sig: Signature) -> Vec<GroupRef> {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|g| g.sig.subset_of(&sig) && g.sig != sig)
            .collect()
    }

    fn insert(&self, group: &GroupRef) {
        self.groups.lock().unwrap().push(Arc::downgrade(group));
    }
}

impl Drop for Group {
    /// Leaf groups (exactly one signature bit) return that bit to the shared allocator. Meet
    /// groups own no bit of their own (their signature is the union of their contributors') and
    /// need no cleanup beyond the `Weak` entries in [`Lattice`] going stale.
    fn drop(&mut self) {
        if self.sig.count_bits() == 1 {
            if let Some(bit) = self.sig.lowest_bit() {
                Lattice::global().bits.lock().unwrap().free(bit);
            }
        }
    }
}

/// Creates a new leaf group (spec §4.3 `create_leaf`), allocating a fresh signature bit.
///
/// # Errors
///
/// Returns [`crate::RuntimeError::GroupBitsExhausted`] if the hard ceiling on simultaneously live
/// leaf groups (see [`crate::bitmap::MAX_BITS`]) has been reached.
pub fn create_group(name: Option<String>) -> Result<GroupRef, crate::RuntimeError> {
    let lattice = Lattice::global();
    let bit = lattice
        .bits
        .lock()
        .unwrap()
        .alloc()
        .ok_or(crate::RuntimeError::GroupBitsExhausted)?;
    let sig = Signature::singleton(bit);
    let group = Arc::new(Group {
        id: Id::next(),
        name,
        sig,
        tasks: AtomicUsize::new(0),
        cancelled: AtomicBool::new(false),
        members: Mutex::new(HashMap::new()),
        waiters: Mutex::new(Vec::new()),
        ancestors: lattice.ancestors_of(sig),
    });
    lattice.insert(&group);
    tracing::trace!(group.id = group.id.as_u64(), "group_created");
    Ok(group)
}

/// Computes (or looks up) the intersection of `a` and `b` (spec §4.3 `meet`).
///
/// `intersect(a, b) == intersect(b, a)` always: if one signature is already a subset of the
/// other, the (unique) subset group is returned directly; otherwise the union signature is
/// looked up (or created) in the meet database, keyed by signature — independent of argument
/// order.
#[must_use]
pub fn intersect(a: &GroupRef, b: &GroupRef) -> GroupRef {
    if a.sig.subset_of(&b.sig) {
        return a.clone();
    }
    if b.sig.subset_of(&a.sig) {
        return b.clone();
    }

    let new_sig = a.sig.union(&b.sig);
    let lattice = Lattice::global();

    {
        let db = lattice.meet_db.lock().unwrap();
        if let Some(existing) = db.get(&new_sig).and_then(Weak::upgrade) {
            return existing;
        }
    }

    let group = Arc::new(Group {
        id: Id::next(),
        name: None,
        sig: new_sig,
        tasks: AtomicUsize::new(0),
        cancelled: AtomicBool::new(a.is_cancelled() || b.is_cancelled()),
        members: Mutex::new(HashMap::new()),
        waiters: Mutex::new(Vec::new()),
        ancestors: lattice.ancestors_of(new_sig),
    });

    let mut db = lattice.meet_db.lock().unwrap();
    // Another thread may have raced us to create the same meet (or an earlier one was dropped
    // and this is a legitimate replacement); prefer a still-live existing entry so `intersect`
    // returns a stable handle regardless of call order.
    let group = match db.get(&new_sig).and_then(Weak::upgrade) {
        Some(existing) => existing,
        None => {
            db.insert(new_sig, Arc::downgrade(&group));
            group
        }
    };
    drop(db);
    lattice.insert(&group);
    group
}

/// Blocks the caller until `group`'s task count is observed to reach zero.
pub fn wait_for_group(group: &GroupRef) {
    crate::futex::block_until(group.clone(), |g| g.is_empty(), Group::register_waiter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_commutative() {
        let a = create_group(None).unwrap();
        let b = create_group(None).unwrap();
        let x = intersect(&a, &b);
        let y = intersect(&b, &a);
        assert!(Arc::ptr_eq(&x, &y));
    }

    #[test]
    fn intersect_with_subset_returns_the_subset() {
        let a = create_group(None).unwrap();
        let b = create_group(None).unwrap();
        let ab = intersect(&a, &b);
        let ab2 = intersect(&ab, &a);
        assert!(Arc::ptr_eq(&ab, &ab2));
    }

    #[test]
    fn dropping_a_leaf_group_frees_its_bit_and_does_not_panic() {
        let a = create_group(None).unwrap();
        drop(a);
        // Exercises `Group::drop`'s `BitAllocator::free` path; the global allocator is shared
        // with every other test in this process, so we only assert further allocation keeps
        // succeeding rather than pinning an exact bit number.
        let _b = create_group(None).unwrap();
    }

    #[test]
    fn enter_and_leave_roll_up_to_ancestors() {
        let a = create_group(None).unwrap();
        let b = create_group(None).unwrap();
        let ab = intersect(&a, &b);
        assert!(a.is_empty() && b.is_empty() && ab.is_empty());
        ab.enter();
        assert!(!a.is_empty());
        assert!(!b.is_empty());
        assert!(!ab.is_empty());
        ab.leave();
        assert!(a.is_empty() && b.is_empty() && ab.is_empty());
    }
}
