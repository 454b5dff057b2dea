// Concurrent hammering of one shared tier: promotions, queries and
// turnovers from several threads, with consistency checked under the lock.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seedcache::{AlignmentCache, QKey, QVal, SharedCache, nt4_codes};
use std::sync::Arc;
use std::thread;

fn mib(n: u64) -> u64 {
    n * 1024 * 1024
}

/// The sixteen 4-base seeds a worker cycles through.
fn seed_pool() -> Vec<Vec<u8>> {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut seeds = Vec::new();
    for &a in &bases {
        for &b in &bases {
            seeds.push(nt4_codes(&[a, b, a, b]));
        }
    }
    seeds
}

/// Build one entry in a thread-private tier, the way a session would. The
/// suffix-array range of a reference key is a deterministic function of
/// the key, as it is in a real index, so entries from different workers
/// always agree about shared reference substrings.
fn build_entry(tier: &mut AlignmentCache, qk: &QKey, rng: &mut StdRng) -> QVal {
    let mut qv = QVal::new();
    tier.add(qk).expect("thread-private tier is large enough");
    let ranges = rng.gen_range(1u64..4);
    for r in 0..ranges {
        let rk = QKey {
            seq: (qk.seq + r + 1) & 0xff,
            len: qk.len,
        };
        let top = (rk.seq % 1000) as u32;
        let len = (rk.seq % 7) as u32 + 1;
        assert!(tier.add_on_the_fly(&mut qv, &rk, top, top + len));
    }
    tier.commit(qk, &qv);
    qv
}

#[test]
fn shared_tier_survives_concurrent_use() {
    let _ = env_logger::builder().is_test(true).try_init();
    let shared = Arc::new(SharedCache::new(mib(1)));
    let seeds = seed_pool();

    let mut handles = Vec::new();
    for worker in 0..4u64 {
        let shared = Arc::clone(&shared);
        let seeds = seeds.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xbeef + worker);
            let mut current = AlignmentCache::new(mib(1), false);
            for iter in 0..500 {
                let qk = QKey::from_codes(&seeds[rng.gen_range(0..seeds.len())]);
                match rng.gen_range(0..10) {
                    // Mostly reads: any hit must be self-consistent.
                    0..=5 => {
                        shared.with(|tier| {
                            if let Some(qv) = tier.query(&qk).copied() {
                                assert!(qv.valid());
                                let mut satups = Vec::new();
                                tier.query_qval(&qv, &mut satups);
                                assert_eq!(satups.len(), qv.num_ranges() as usize);
                                let elts: u32 = satups.iter().map(|t| t.offs.len()).sum();
                                assert_eq!(elts, qv.num_elts());
                            }
                        });
                    }
                    // Promotions from a thread-private tier.
                    6..=8 => {
                        let qv = build_entry(&mut current, &qk, &mut rng);
                        shared.clear_copy(&qk, &qv, &current);
                        current.clear();
                    }
                    // Rare full turnover.
                    _ => {
                        if iter % 97 == 0 {
                            shared.clear();
                        }
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().expect("worker panicked");
    }

    shared.with(|tier| tier.assert_consistent());
}

#[test]
fn promotions_are_atomic_under_the_lock() {
    // Two writers promote entries for the same keys while a reader checks
    // that every observed payload resolves completely.
    let shared = Arc::new(SharedCache::new(mib(1)));
    let seeds = seed_pool();

    let writers: Vec<_> = (0..2u64)
        .map(|worker| {
            let shared = Arc::clone(&shared);
            let seeds = seeds.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                let mut current = AlignmentCache::new(mib(1), false);
                for _ in 0..300 {
                    let qk = QKey::from_codes(&seeds[rng.gen_range(0..seeds.len())]);
                    let qv = build_entry(&mut current, &qk, &mut rng);
                    shared.clear_copy(&qk, &qv, &current);
                    current.clear();
                }
            })
        })
        .collect();

    let reader = {
        let shared = Arc::clone(&shared);
        let seeds = seeds.clone();
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xabcd);
            for _ in 0..2000 {
                let qk = QKey::from_codes(&seeds[rng.gen_range(0..seeds.len())]);
                shared.with(|tier| {
                    if let Some(qv) = tier.query(&qk).copied() {
                        let mut satups = Vec::new();
                        tier.query_qval(&qv, &mut satups);
                        assert_eq!(satups.len(), qv.num_ranges() as usize);
                    }
                    tier.assert_consistent();
                });
            }
        })
    };

    for w in writers {
        w.join().expect("writer panicked");
    }
    reader.join().expect("reader panicked");
}
