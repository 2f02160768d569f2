use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use flash_map::FlashMap;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("flash_map_insert_10k", |b| {
        b.iter_batched(
            FlashMap::<String, u64>::new,
            |mut m| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.insert(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_with_pinned_cursors(c: &mut Criterion) {
    c.bench_function("flash_map_insert_10k_64_cursors", |b| {
        b.iter_batched(
            || {
                let mut m = FlashMap::<String, u64>::with_capacity(16);
                let cursors: Vec<_> = lcg(3)
                    .take(64)
                    .map(|x| {
                        let k = key(x);
                        m.insert(k.clone(), x).unwrap();
                        m.find(&k).unwrap()
                    })
                    .collect();
                (m, cursors)
            },
            |(mut m, cursors)| {
                // Every rehash relocates the pinned cursors.
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.insert(key(x), i as u64).unwrap();
                }
                black_box((m, cursors))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("flash_map_get_hit", |b| {
        let mut m = FlashMap::new();
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for (i, k) in keys.iter().cloned().enumerate() {
            m.insert(k, i as u64).unwrap();
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get(k));
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("flash_map_get_miss", |b| {
        let mut m = FlashMap::new();
        for (i, x) in lcg(11).take(10_000).enumerate() {
            m.insert(key(x), i as u64).unwrap();
        }
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in map
            let k = key(miss.next().unwrap());
            black_box(m.get(&k));
        })
    });
}

fn bench_erase_reinsert(c: &mut Criterion) {
    c.bench_function("flash_map_erase_reinsert", |b| {
        let mut m = FlashMap::new();
        let keys: Vec<_> = lcg(13).take(10_000).map(key).collect();
        for (i, k) in keys.iter().cloned().enumerate() {
            m.insert(k, i as u64).unwrap();
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            m.erase(k);
            // Lands on the tombstone just left behind.
            black_box(m.insert(k.clone(), 0).unwrap());
        })
    });
}

fn bench_find_drop_cursor(c: &mut Criterion) {
    c.bench_function("flash_map_find_drop_cursor", |b| {
        let mut m = FlashMap::new();
        m.insert("key".to_string(), 1u64).unwrap();
        b.iter(|| {
            let cursor = m.find("key").unwrap();
            black_box(&cursor);
            drop(cursor);
        })
    });
}

fn bench_cursor_walk(c: &mut Criterion) {
    c.bench_function("flash_map_cursor_walk_10k", |b| {
        let mut m = FlashMap::new();
        for (i, x) in lcg(17).take(10_000).enumerate() {
            m.insert(key(x), i as u64).unwrap();
        }
        b.iter(|| {
            let mut sum = 0u64;
            let mut cur = m.begin().unwrap();
            while !cur.is_end(&m).unwrap() {
                sum = sum.wrapping_add(*cur.value(&m).unwrap());
                cur.advance(&m).unwrap();
            }
            black_box(sum)
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
    targets = bench_insert,
        bench_insert_with_pinned_cursors,
        bench_get_hit,
        bench_get_miss,
        bench_erase_reinsert,
        bench_find_drop_cursor,
        bench_cursor_walk
}
criterion_main!(benches);
