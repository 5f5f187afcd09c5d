use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pmi_core::postings::intersect_count;
use pmi_core::{PmiSelector, SelectorConfig, Shard};

fn bench_intersect(c: &mut Criterion) {
    let dense: Vec<u32> = (0..100_000).collect();
    let sparse: Vec<u32> = (0..100_000).step_by(97).collect();
    let half: Vec<u32> = (0..100_000).step_by(2).collect();
    c.bench_function("intersect_merge", |b| b.iter(|| intersect_count(black_box(&dense), black_box(&half))));
    c.bench_function("intersect_gallop", |b| b.iter(|| intersect_count(black_box(&sparse), black_box(&dense))));
}

fn bench_label_scan(c: &mut Criterion) {
    let mut s = PmiSelector::new(SelectorConfig::default(), Shard::all()).unwrap();
    for i in 0..20_000u32 {
        let features: Vec<String> = (0..8).map(|j| format!("f{}", (i * 7 + j * 131) % 5_000)).collect();
        s.add_positive(&format!("label{}", i % 50), &features).unwrap();
    }
    c.bench_function("exact_rows_50_labels", |b| b.iter(|| s.exact_rows()));
}

criterion_group!(benches, bench_intersect, bench_label_scan);
criterion_main!(benches);
