use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use seedcache::{AlignmentCache, AlignmentCacheIface, BeginAlign, QKey};

fn mib(n: u64) -> u64 {
    n * 1024 * 1024
}

/// Deterministic 16-base seeds, distinct per index.
fn seed_codes(i: u64) -> Vec<u8> {
    (0..16).map(|j| ((i >> (j % 8)) & 3) as u8 ^ (j as u8 & 3)).collect()
}

/// One full session: miss, four discovered reference substrings, finish.
fn run_session(iface: &mut AlignmentCacheIface, seed: &[u8]) {
    match iface.begin_align(seed) {
        BeginAlign::Miss => {}
        other => panic!("expected miss, got {:?}", other),
    }
    for r in 0..4u32 {
        let mut rf = seed.to_vec();
        rf[0] = (rf[0] + 1) & 3;
        rf[15] = r as u8 & 3;
        assert!(iface.add_on_the_fly(&rf, r * 100, r * 100 + 8));
    }
    black_box(iface.finish_align());
}

fn bench_session_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Elements(4));
    group.bench_function("build_4_ranges", |b| {
        let mut iface = AlignmentCacheIface::new(AlignmentCache::new(mib(16), false), None, None);
        let seed = seed_codes(7);
        b.iter(|| {
            iface.next_read();
            run_session(&mut iface, &seed);
        });
    });
    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    c.bench_function("begin_align_hit", |b| {
        let mut iface = AlignmentCacheIface::new(AlignmentCache::new(mib(16), false), None, None);
        let seed = seed_codes(11);
        run_session(&mut iface, &seed);
        b.iter(|| match iface.begin_align(black_box(&seed)) {
            BeginAlign::Hit(qv) => black_box(qv),
            other => panic!("expected hit, got {:?}", other),
        });
    });
}

fn bench_promotion(c: &mut Criterion) {
    c.bench_function("finish_align_promote_to_local", |b| {
        let mut iface = AlignmentCacheIface::new(
            AlignmentCache::new(mib(16), false),
            Some(AlignmentCache::new(mib(64), false)),
            None,
        );
        let seeds: Vec<Vec<u8>> = (0..256).map(seed_codes).collect();
        let mut i = 0usize;
        b.iter(|| {
            iface.next_read();
            run_session(&mut iface, &seeds[i & 255]);
            i += 1;
        });
    });
}

fn bench_query_ex(c: &mut Criterion) {
    c.bench_function("query_ex_materialize", |b| {
        let mut iface = AlignmentCacheIface::new(AlignmentCache::new(mib(16), false), None, None);
        let seed = seed_codes(3);
        run_session(&mut iface, &seed);
        let qk = QKey::from_codes(&seed);
        let mut satups = Vec::with_capacity(8);
        b.iter(|| {
            satups.clear();
            iface.query_ex(black_box(&qk), &mut satups);
            black_box(satups.len())
        });
    });
}

criterion_group!(
    benches,
    bench_session_build,
    bench_cache_hit,
    bench_promotion,
    bench_query_ex
);
criterion_main!(benches);
