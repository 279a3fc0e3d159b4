//! Rank generation and reorder planning.

use clarity_core::rank;
use clarity_core::reorder::{Sibling, plan_reorder};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn ranks(count: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    let mut last = rank::initial();
    for _ in 0..count {
        out.push(last.clone());
        last = rank::after(&last).unwrap_or_else(|_| format!("{last}h"));
    }
    out
}

fn bench_between(c: &mut Criterion) {
    c.bench_function("rank.between.adjacent", |b| {
        b.iter(|| black_box(rank::between(black_box("h"), black_box("h1"))));
    });

    // Repeatedly bisecting toward one bound grows the key; measure the worst case.
    c.bench_function("rank.between.deep_bisect_64", |b| {
        b.iter(|| {
            let mut hi = String::from("i");
            for _ in 0..64 {
                match rank::between("h", &hi) {
                    Ok(mid) => hi = mid,
                    Err(_) => break,
                }
            }
            black_box(hi)
        });
    });
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder.plan");
    for count in [10_usize, 100, 1_000] {
        let owned = ranks(count);
        let ids: Vec<String> = (0..count).map(|i| format!("item-{i}")).collect();
        let siblings: Vec<Sibling<'_>> = ids
            .iter()
            .zip(&owned)
            .map(|(id, rank)| Sibling { id, rank })
            .collect();
        group.bench_with_input(BenchmarkId::new("last_to_first", count), &siblings, |b, sibs| {
            let moved = sibs.last().map_or("", |s| s.id);
            b.iter(|| black_box(plan_reorder(sibs, moved, 0)));
        });
        group.bench_with_input(BenchmarkId::new("insert_middle", count), &siblings, |b, sibs| {
            b.iter(|| black_box(plan_reorder(sibs, "item-new", sibs.len() / 2)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_between, bench_plan);
criterion_main!(benches);
