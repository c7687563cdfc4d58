// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parallel patterns (C9/C10): thin wrappers over the adaptive work-stealing tree
//! ([`pfor_each`]/[`ptransform`]) and over static chunking ([`pscan_inclusive`]/[`preduce`]).
//!
//! Nested pfors inside a pfor-spawned task degenerate to serial iteration unless the caller
//! supplies a group to collect the inner tasks into, per spec §4.9.

mod tree;

use crate::group::{create_group, wait_for_group, GroupRef};
use crate::task::{create_task_with, TaskAttrs, TaskBody};

use std::ops::Range;
use std::sync::Arc;
use tree::Node;

fn is_nested_pfor_without_group(group: &Option<GroupRef>) -> bool {
    group.is_none()
        && crate::cancel::current_task()
            .is_some_and(|t| t.attrs().contains(TaskAttrs::PFOR))
}

/// Calls `body(i)` exactly once for every `i` in `range`, in parallel, via the adaptive
/// work-stealing tree.
///
/// If called from inside another pfor-spawned task with no `group` supplied, degenerates to a
/// plain serial loop (spec §4.9) rather than spawning nested work that no one is watching.
pub fn pfor_each<F>(range: Range<usize>, body: F, group: Option<GroupRef>)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    if range.is_empty() {
        return;
    }
    if is_nested_pfor_without_group(&group) {
        range.for_each(body);
        return;
    }

    let blk = crate::scheduler::config().pfor_block_size();
    let root = Arc::new(Node::root(range.start, range.end));
    let body = Arc::new(body);

    drive_tree(root, blk, move |lo, hi| {
        for i in lo..hi {
            body(i);
        }
    }, group);
}

/// As [`pfor_each`], but `body` receives the half-open subrange `[lo, hi)` directly rather than
/// one index at a time, matching the original's block-granular transform body.
pub fn ptransform<F>(range: Range<usize>, body: F, group: Option<GroupRef>)
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    if range.is_empty() {
        return;
    }
    if is_nested_pfor_without_group(&group) {
        body(range.start, range.end);
        return;
    }

    let blk = crate::scheduler::config().pfor_block_size();
    let root = Arc::new(Node::root(range.start, range.end));
    drive_tree(root, blk, body, group);
}

/// Spawns one task per execution context and waits for them all to finish driving `root` to
/// completion.
///
/// Pre-splits (spec §4.8) the first `ceil(log2(n))` levels eagerly so each of the first
/// `leaves.len()` workers starts on a leaf already its own, rather than every worker racing
/// through [`Node::find_work`] from a cold root; a subtree that can't be split that deep (its
/// range drops below 2 elements first) simply contributes fewer, still-distinct leaves, so the
/// remaining workers fall straight through to `find_work`.
fn drive_tree<F>(root: Arc<Node>, blk: usize, f: F, group: Option<GroupRef>)
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    let internal_group = group.unwrap_or_else(|| create_group(None).expect("pfor group"));
    let n = crate::scheduler::num_execution_contexts().max(1);
    let f = Arc::new(f);

    let leaves = if n > 1 {
        let levels = tree::ceil_log2(n);
        let mut leaves = Vec::new();
        tree::pre_split(&root, levels, &mut Vec::new(), &mut leaves);
        leaves
    } else {
        Vec::new()
    };
    let leaves = Arc::new(leaves);

    for worker in 0..n {
        let root = root.clone();
        let f = f.clone();
        let leaves = leaves.clone();
        let task = create_task_with(
            TaskBody::Plain(Box::new(move || {
                drive_worker(&root, worker, &leaves, blk, f.as_ref());
            })),
            TaskAttrs::PFOR | TaskAttrs::ANONYMOUS,
        );
        task.launch(Some(internal_group.clone()));
    }

    wait_for_group(&internal_group);
}

fn drive_worker(
    root: &Node,
    worker: usize,
    leaves: &[Vec<tree::Dir>],
    blk: usize,
    f: &(dyn Fn(usize, usize) + Sync),
) {
    match leaves.get(worker) {
        Some(path) => tree::navigate(root, path).drive(blk, f),
        // No pre-split happened at all (single execution context): worker 0 owns the whole root.
        None if leaves.is_empty() && worker == 0 => root.drive(blk, f),
        None => {}
    }
    while let Some(node) = root.find_work() {
        node.drive(blk, f);
    }
}

/// Inclusive parallel scan (spec §4.9 "Sklansky halving"): `out[i] = combine(out[i-1], in[i])` for
/// `i > 0`, `out[0] = in[0]`, computed by statically chunking `range` into
/// `4 * num_execution_contexts()` blocks, scanning each chunk locally and in parallel, then fixing
/// up the per-chunk offsets with a second parallel pass.
///
/// Each chunk task is handed an owned copy of its slice (rather than a borrow into `data`) so its
/// body can be `'static`, as every other task body in this crate is; the results are copied back
/// into `data` sequentially once the whole chunk has finished, between phases and at the end.
pub fn pscan_inclusive<T, F>(data: &mut [T], combine: F, group: Option<GroupRef>)
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T, &T) -> T + Send + Sync + 'static,
{
    if data.is_empty() {
        return;
    }
    let chunks = chunk_ranges(data.len());
    let combine = Arc::new(combine);

    // Phase 1: scan each chunk locally and in parallel.
    let results: Vec<std::sync::Mutex<Option<Vec<T>>>> =
        chunks.iter().map(|_| std::sync::Mutex::new(None)).collect();
    let results = Arc::new(results);
    let owned_chunks: Vec<Vec<T>> = chunks.iter().map(|&(lo, hi)| data[lo..hi].to_vec()).collect();

    run_indexed_owned(owned_chunks, {
        let combine = combine.clone();
        let results = results.clone();
        move |idx, mut chunk| {
            for i in 1..chunk.len() {
                chunk[i] = combine(&chunk[i - 1], &chunk[i]);
            }
            *results[idx].lock().unwrap() = Some(chunk);
        }
    }, group.clone());

    for (&(lo, hi), r) in chunks.iter().zip(results.iter()) {
        data[lo..hi].clone_from_slice(&r.lock().unwrap().take().expect("chunk task must have run"));
    }

    // Phase 2: fold the last element of each earlier chunk into every element of every later
    // chunk (there are only `4 * num_execution_contexts()` chunk boundaries, so this runs
    // sequentially rather than spawning a second wave of tasks per boundary).
    let mut carry: Option<T> = None;
    for &(lo, hi) in &chunks {
        if let Some(c) = carry.clone() {
            for v in &mut data[lo..hi] {
                *v = combine(&c, v);
            }
        }
        carry = Some(data[hi - 1].clone());
    }
}

/// Tree-reduction of `range` under `body`/`combine` (spec §4.9 "ADDED: `preduce`"), sharing
/// `ptransform`'s static chunking. `body` folds `identity` across one chunk; `combine` merges two
/// partials. Chunk partials are combined sequentially once every chunk task has finished, since
/// there are only `4 * num_execution_contexts()` of them.
pub fn preduce<T, B, C>(range: Range<usize>, identity: T, body: B, combine: C, group: Option<GroupRef>) -> T
where
    T: Clone + Send + Sync + 'static,
    B: Fn(T, usize) -> T + Send + Sync + 'static,
    C: Fn(T, T) -> T + Send + Sync,
{
    if range.is_empty() {
        return identity;
    }

    let chunks = chunk_ranges_over(range);
    let body = Arc::new(body);
    let partials: Vec<std::sync::Mutex<Option<T>>> =
        chunks.iter().map(|_| std::sync::Mutex::new(None)).collect();
    let partials = Arc::new(partials);

    run_indexed_chunked(chunks, {
        let body = body.clone();
        let partials = partials.clone();
        let identity = identity.clone();
        move |idx, lo, hi| {
            let mut acc = identity.clone();
            for i in lo..hi {
                acc = body(acc, i);
            }
            *partials[idx].lock().unwrap() = Some(acc);
        }
    }, group);

    partials
        .iter()
        .map(|m| m.lock().unwrap().take().expect("chunk task must have run"))
        .fold(identity, |acc, p| combine(acc, p))
}

fn chunk_ranges(len: usize) -> Vec<(usize, usize)> {
    chunk_ranges_over(0..len)
}

/// Splits `range` into `4 * num_execution_contexts()` (or fewer, if `range` is shorter)
/// contiguous blocks, per spec §4.9's static-chunking patterns.
fn chunk_ranges_over(range: Range<usize>) -> Vec<(usize, usize)> {
    let len = range.end - range.start;
    let target = (4 * crate::scheduler::num_execution_contexts().max(1)).max(1);
    let n_chunks = target.min(len).max(1);
    let base = len / n_chunks;
    let rem = len % n_chunks;
    let mut out = Vec::with_capacity(n_chunks);
    let mut cur = range.start;
    for i in 0..n_chunks {
        let size = base + usize::from(i < rem);
        out.push((cur, cur + size));
        cur += size;
    }
    out
}

/// Runs `f(idx, chunk)` once per `(idx, chunk)` pair in parallel, each `chunk` handed to its task
/// by value so the task body can be `'static`.
fn run_indexed_owned<T, F>(owned_chunks: Vec<Vec<T>>, f: F, group: Option<GroupRef>)
where
    T: Send + 'static,
    F: Fn(usize, Vec<T>) + Send + Sync + 'static,
{
    let internal_group = group.unwrap_or_else(|| create_group(None).expect("pfor group"));
    let f = Arc::new(f);
    for (idx, chunk) in owned_chunks.into_iter().enumerate() {
        let f = f.clone();
        let task = create_task_with(
            TaskBody::Plain(Box::new(move || f(idx, chunk))),
            TaskAttrs::PFOR | TaskAttrs::ANONYMOUS,
        );
        task.launch(Some(internal_group.clone()));
    }
    wait_for_group(&internal_group);
}

fn run_indexed_chunked<F>(chunks: Vec<(usize, usize)>, f: F, group: Option<GroupRef>)
where
    F: Fn(usize, usize, usize) + Send + Sync + 'static,
{
    let internal_group = group.unwrap_or_else(|| create_group(None).expect("pfor group"));
    let f = Arc::new(f);
    for (idx, (lo, hi)) in chunks.into_iter().enumerate() {
        let f = f.clone();
        let task = create_task_with(
            TaskBody::Plain(Box::new(move || f(idx, lo, hi))),
            TaskAttrs::PFOR | TaskAttrs::ANONYMOUS,
        );
        task.launch(Some(internal_group.clone()));
    }
    wait_for_group(&internal_group);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_cover_input_exactly_once() {
        for len in [0usize, 1, 3, 7, 100, 1000] {
            let chunks = chunk_ranges(len);
            let mut cur = 0;
            for (lo, hi) in &chunks {
                assert_eq!(*lo, cur);
                assert!(hi >= lo);
                cur = *hi;
            }
            assert_eq!(cur, len);
        }
    }
}
