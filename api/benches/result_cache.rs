use std::collections::VecDeque;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

#[derive(Clone, Copy)]
struct Entry {
    archived_at: i64,
}

/// Mirrors `ResultCache::encache`'s insertion strategy: scan for the first
/// entry older than the new one and insert just before it.
fn insert_sorted(items: &mut VecDeque<Entry>, entry: Entry) {
    let at = items.iter().position(|e| entry.archived_at > e.archived_at).unwrap_or(items.len());
    items.insert(at, entry);
}

fn filled(n: i64) -> VecDeque<Entry> {
    let mut items = VecDeque::new();
    for i in 0..n {
        insert_sorted(&mut items, Entry { archived_at: i });
    }
    items
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_cache_insert_sorted");
    for n in [10, 100, 1000, 10000].iter() {
        let base = filled(*n);
        group.bench_function(BenchmarkId::new("insert_into_filled", n), |b| {
            b.iter(|| {
                let mut items = base.clone();
                insert_sorted(&mut items, Entry { archived_at: n / 2 });
            })
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
