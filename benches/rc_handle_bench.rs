use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rc_guard::RcHandle;
use std::thread;
use std::time::Duration;

fn bench_clone_put(c: &mut Criterion) {
    c.bench_function("rc_handle_clone_put", |b| {
        let r = RcHandle::new(0u64, |_| {});
        b.iter(|| {
            let mut x = r.clone();
            black_box(*x);
            x.put();
        })
    });
}

fn bench_new_release(c: &mut Criterion) {
    c.bench_function("rc_handle_new_release", |b| {
        b.iter(|| {
            let mut r = RcHandle::new(black_box(1u64), |v| {
                black_box(v);
            });
            r.put();
        })
    });
}

fn bench_contended_clone_put(c: &mut Criterion) {
    c.bench_function("rc_handle_clone_put_4_threads", |b| {
        let r = RcHandle::new(0u64, |_| {});
        b.iter(|| {
            thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..1_000 {
                            let mut x = r.clone();
                            black_box(&x);
                            x.put();
                        }
                    });
                }
            })
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_clone_put, bench_new_release, bench_contended_clone_put
}
criterion_main!(benches);
