// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use criterion::{criterion_group, criterion_main, Criterion};

static INIT: Once = Once::new();

fn ensure_runtime() {
    INIT.call_once(|| {
        weave_rt::runtime_init().expect("runtime_init");
    });
}

fn pfor_each_100k(c: &mut Criterion) {
    ensure_runtime();
    let counters: Arc<Vec<AtomicU64>> = Arc::new((0..100_000).map(|_| AtomicU64::new(0)).collect());

    c.bench_function("pfor_each_100k", |b| {
        b.iter(|| {
            let counters = counters.clone();
            weave_rt::pfor_each(
                0..counters.len(),
                move |i| {
                    counters[i].fetch_add(1, Ordering::Relaxed);
                },
                None,
            );
        });
    });

    black_box(&counters);
}

fn ptransform_100k(c: &mut Criterion) {
    ensure_runtime();
    let counters: Arc<Vec<AtomicU64>> = Arc::new((0..100_000).map(|_| AtomicU64::new(0)).collect());

    c.bench_function("ptransform_100k", |b| {
        b.iter(|| {
            let counters = counters.clone();
            weave_rt::ptransform(
                0..counters.len(),
                move |lo, hi| {
                    for i in lo..hi {
                        counters[i].fetch_add(1, Ordering::Relaxed);
                    }
                },
                None,
            );
        });
    });

    black_box(&counters);
}

fn preduce_sum_100k(c: &mut Criterion) {
    ensure_runtime();

    c.bench_function("preduce_sum_100k", |b| {
        b.iter(|| {
            let sum = weave_rt::preduce(0..100_000usize, 0u64, |acc, i| acc + i as u64, |a, b| a + b, None);
            black_box(sum);
        });
    });
}

criterion_group!(pfor, pfor_each_100k, ptransform_100k, preduce_sum_100k);
criterion_main!(pfor);
