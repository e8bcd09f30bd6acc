//! Ring and channel latency benchmarks.
//!
//! Measures the single-process floor of the transport: slot copy plus the
//! acquire/release handoff. Cross-process numbers land in the same range
//! because the memory traffic is identical — only the cores differ.
//!
//! ```bash
//! cargo bench --bench ring_latency
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ksched_core::config::MSG_CAPACITY;
use ksched_core::ipc::{Channel, ShmRegion};

const REQUEST_LINE: &[u8] = b"GemmInternalCublas|req_1|pytorch\n";

fn bench_uncontended_ops(c: &mut Criterion) {
    let name = format!("/ksched_bench_ops_{}", std::process::id());
    let region = ShmRegion::<Channel>::create(&name).expect("create channel");
    let chan = region.get();

    let mut group = c.benchmark_group("ring_uncontended");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop", |b| {
        let mut buf = [0u8; MSG_CAPACITY];
        b.iter(|| {
            chan.request_ring().try_push(black_box(REQUEST_LINE)).unwrap();
            chan.request_ring().try_pop(&mut buf).unwrap()
        });
    });

    group.bench_function("push_pop_blocking", |b| {
        let mut buf = [0u8; MSG_CAPACITY];
        b.iter(|| {
            chan.request_ring()
                .push_blocking(black_box(REQUEST_LINE), -1)
                .unwrap();
            chan.request_ring().pop_blocking(&mut buf, -1).unwrap()
        });
    });

    group.finish();
    drop(region);
    let _ = ShmRegion::<Channel>::unlink(&name);
}

fn bench_cross_thread_ping_pong(c: &mut Criterion) {
    let name = format!("/ksched_bench_pp_{}", std::process::id());
    let region = Arc::new(ShmRegion::<Channel>::create(&name).expect("create channel"));
    let stop = Arc::new(AtomicBool::new(false));

    // Echo peer: requests come straight back on the response ring, the same
    // shape as a service task with a zero-cost policy.
    let echo = {
        let region = region.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let chan = region.get();
            let mut buf = [0u8; MSG_CAPACITY];
            while !stop.load(Ordering::Acquire) {
                if let Some(len) = chan.request_ring().try_pop(&mut buf) {
                    let _ = chan.response_ring().try_push(&buf[..len]);
                } else {
                    std::hint::spin_loop();
                }
            }
        })
    };

    let mut group = c.benchmark_group("channel");
    group.throughput(Throughput::Elements(1));
    group.bench_function("ping_pong", |b| {
        let chan = region.get();
        let mut buf = [0u8; MSG_CAPACITY];
        b.iter(|| {
            chan.request_ring()
                .push_blocking(black_box(REQUEST_LINE), -1)
                .unwrap();
            chan.response_ring().pop_blocking(&mut buf, -1).unwrap()
        });
    });
    group.finish();

    stop.store(true, Ordering::Release);
    echo.join().unwrap();
    drop(region);
    let _ = ShmRegion::<Channel>::unlink(&name);
}

criterion_group!(benches, bench_uncontended_ops, bench_cross_thread_ping_pong);
criterion_main!(benches);
