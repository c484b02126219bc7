#![cfg(feature = "bench")]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wsmessenger::bench_support::DispatchContext;

fn dispatch_benches(c: &mut Criterion) {
    let mut ctx_small = DispatchContext::new(1, 1);
    let mut ctx_large = DispatchContext::new(16, 1);

    c.bench_function("dispatch_1_listener", |b| {
        b.iter(|| {
            ctx_small
                .server
                .on_message(black_box(DispatchContext::message(false)), "bench-0");
        });
    });

    c.bench_function("dispatch_16_listeners_with_response", |b| {
        b.iter(|| {
            ctx_large
                .server
                .on_message(black_box(DispatchContext::message(true)), "bench-0");
            ctx_large.drain();
        });
    });

    // Unknown sender takes the drop path.
    c.bench_function("dispatch_unknown_client", |b| {
        b.iter(|| {
            ctx_small
                .server
                .on_message(black_box(DispatchContext::message(false)), "nobody");
        });
    });
    ctx_small.drain();
}

fn broadcast_benches(c: &mut Criterion) {
    let mut ctx_small = DispatchContext::new(0, 32);
    let mut ctx_large = DispatchContext::new(0, 256);
    let message = DispatchContext::message(false);

    c.bench_function("broadcast_32", |b| {
        b.iter(|| {
            ctx_small.server.broadcast(black_box(&message));
            ctx_small.drain();
        });
    });

    c.bench_function("broadcast_256", |b| {
        b.iter(|| {
            ctx_large.server.broadcast(black_box(&message));
            ctx_large.drain();
        });
    });
}

criterion_group!(wsmessenger, dispatch_benches, broadcast_benches);
criterion_main!(wsmessenger);
