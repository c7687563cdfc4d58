// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::Duration;

use weave_rt::{
    add_dependency, cancel, create_group, create_task, intersect, launch, spawn, wait_for,
    RuntimeConfig, TaskBody,
};

static INIT: Once = Once::new();

fn ensure_runtime() {
    INIT.call_once(|| {
        weave_rt::runtime_init_with(RuntimeConfig::builder().worker_count(4).build())
            .expect("runtime_init");
    });
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    ensure_runtime();

    let order = Arc::new(Mutex::new(Vec::new()));

    let o1 = order.clone();
    let t1 = create_task(TaskBody::Plain(Box::new(move || o1.lock().unwrap().push(1))));
    let o2 = order.clone();
    let t2 = create_task(TaskBody::Plain(Box::new(move || o2.lock().unwrap().push(2))));
    let o3 = order.clone();
    let t3 = create_task(TaskBody::Plain(Box::new(move || o3.lock().unwrap().push(3))));

    add_dependency(&t1, &t2);
    add_dependency(&t2, &t3);

    launch(&t3, None);
    launch(&t2, None);
    launch(&t1, None);

    wait_for(&t3);

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    assert!(!t1.is_canceled() && !t2.is_canceled() && !t3.is_canceled());
}

#[test]
fn cancel_before_launch_prevents_the_whole_chain_from_running() {
    ensure_runtime();

    let ran = Arc::new(AtomicUsize::new(0));

    let r1 = ran.clone();
    let t1 = create_task(TaskBody::Plain(Box::new(move || {
        r1.fetch_add(1, Ordering::SeqCst);
    })));
    let r2 = ran.clone();
    let t2 = create_task(TaskBody::Plain(Box::new(move || {
        r2.fetch_add(1, Ordering::SeqCst);
    })));
    let r3 = ran.clone();
    let t3 = create_task(TaskBody::Plain(Box::new(move || {
        r3.fetch_add(1, Ordering::SeqCst);
    })));

    add_dependency(&t1, &t2);
    add_dependency(&t2, &t3);

    launch(&t3, None);
    launch(&t2, None);

    cancel(&t1);
    launch(&t1, None);

    wait_for(&t3);

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(t3.is_canceled());
}

#[test]
fn group_of_a_thousand_trivial_tasks_all_run_and_the_group_empties() {
    ensure_runtime();

    let group = create_group(None).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let r = ran.clone();
        spawn(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }, Some(group.clone()));
    }

    wait_for(&group);

    assert_eq!(ran.load(Ordering::SeqCst), 1000);
    assert!(group.is_empty());
}

#[test]
fn intersection_is_commutative_and_waiting_on_either_parent_observes_completion() {
    ensure_runtime();

    let a = create_group(None).unwrap();
    let b = create_group(None).unwrap();
    let x = intersect(&a, &b);
    let y = intersect(&b, &a);
    assert!(Arc::ptr_eq(&x, &y));

    let ran = Arc::new(AtomicBool::new(false));
    let r = ran.clone();
    spawn(move || r.store(true, Ordering::SeqCst), Some(x.clone()));

    wait_for(&a);
    wait_for(&b);

    assert!(ran.load(Ordering::SeqCst));
    assert!(x.is_empty());
}

#[test]
fn blocking_task_is_canceled_promptly_via_its_cancel_handler() {
    ensure_runtime();

    let pair = Arc::new((Mutex::new(false), Condvar::new()));
    let run_pair = pair.clone();
    let cancel_pair = pair.clone();

    let t = create_task(TaskBody::Blocking {
        run: Box::new(move || {
            let (lock, cvar) = &*run_pair;
            let mut signaled = lock.lock().unwrap();
            while !*signaled {
                signaled = cvar.wait(signaled).unwrap();
            }
        }),
        cancel_handler: Box::new(move || {
            let (lock, cvar) = &*cancel_pair;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }),
    });

    launch(&t, None);
    // Give the worker a moment to actually claim and start running the blocking body before we
    // cancel it, so this exercises the "cancel while running" path rather than "never started".
    std::thread::sleep(Duration::from_millis(20));

    cancel(&t);
    wait_for(&t);

    assert!(t.is_canceled());
}

#[test]
fn pfor_each_visits_every_index_exactly_once() {
    ensure_runtime();

    const N: usize = 100_000;
    let counters: Arc<Vec<AtomicUsize>> = Arc::new((0..N).map(|_| AtomicUsize::new(0)).collect());
    let c = counters.clone();

    weave_rt::pfor_each(
        0..N,
        move |i| {
            c[i].fetch_add(1, Ordering::SeqCst);
        },
        None,
    );

    let sum: usize = counters.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_eq!(sum, N);
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
}
