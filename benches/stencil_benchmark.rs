use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fdgen::solver::stencil::{derive_with, StencilCache, StencilKey, StencilLimits};

fn bench_exact_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("stencil_derive");
    let limits = StencilLimits::default();

    for accuracy in [2u32, 4, 8, 12, 16] {
        for (label, key) in [
            ("centered_d1", StencilKey::centered(1, accuracy)),
            ("centered_d2", StencilKey::centered(2, accuracy)),
            ("staggered_d1", StencilKey::staggered(1, accuracy)),
        ] {
            group.bench_with_input(BenchmarkId::new(label, accuracy), &key, |b, &key| {
                b.iter(|| derive_with(key, &limits).unwrap());
            });
        }
    }

    group.finish();
}

fn bench_cached_lookup(c: &mut Criterion) {
    let cache = StencilCache::new(StencilLimits::default());
    let key = StencilKey::centered(2, 8);
    cache.get(key).unwrap();

    c.bench_function("stencil_cache_hit", |b| {
        b.iter(|| cache.get(key).unwrap());
    });
}

criterion_group!(benches, bench_exact_derivation, bench_cached_lookup);
criterion_main!(benches);
