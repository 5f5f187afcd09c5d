use pmi_core::persist::{read_rows, write_rows, CheckpointPaths};
use pmi_core::{
    CheckpointKind, CheckpointScheduler, IndexMode, Instance, PmiSelector, SelectorConfig, Shard,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tempfile::tempdir;

fn scenario() -> Vec<Instance> {
    vec![
        Instance::positive("A", ["f1", "f2"]),
        Instance::positive("A", ["f1", "f3"]),
        Instance::positive("B", ["f2", "f4"]),
        Instance::negative(["f1"]),
        Instance::negative(["f5"]),
    ]
}

/// Seeded corpus: labels L0..L5, features f0..f39, about a quarter negatives.
fn corpus(seed: u64, n: usize) -> Vec<Instance> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let len = rng.gen_range(1..=4);
            let features: Vec<String> = (0..len).map(|_| format!("f{}", rng.gen_range(0..40))).collect();
            if rng.gen_bool(0.25) {
                Instance::negative(features)
            } else {
                Instance::positive(format!("L{}", rng.gen_range(0..6)), features)
            }
        })
        .collect()
}

fn selector(config: SelectorConfig, shard: Shard, data: &[Instance]) -> PmiSelector {
    let mut s = PmiSelector::new(config, shard).unwrap();
    for instance in data {
        s.add(instance).unwrap();
    }
    s
}

#[test]
fn end_to_end_scenario() {
    let s = selector(SelectorConfig { discount: 0.0, ..Default::default() }, Shard::all(), &scenario());
    let exact = s.exact().unwrap();
    let a = s.labels().get("A").unwrap();
    let f1 = s.features().get("f1").unwrap();

    assert_eq!(exact.label_count(a), 2);
    assert_eq!(exact.total_feature_count(f1), 3);
    assert_eq!(exact.co_occurrence(a, f1), 2);
    assert_eq!(s.instances(), 5);
    let expected = 2f64.ln() + 5f64.ln() - 2f64.ln() - 3f64.ln();
    assert!((s.pmi("A", "f1").unwrap() - expected).abs() < 1e-12);

    let rows = s.exact_rows().unwrap();
    assert!(rows.iter().all(|r| r.instances == 5));
    assert!(rows.iter().all(|r| r.pmi.is_finite()));
    assert!(!rows.iter().any(|r| r.label == "A" && r.feature == "f4"));
    assert!(!rows.iter().any(|r| r.label == "B" && r.feature == "f1"));
    assert!(!rows.iter().any(|r| r.feature == "f5"));
    let pairs: BTreeSet<(&str, &str)> = rows.iter().map(|r| (r.label.as_str(), r.feature.as_str())).collect();
    let want: BTreeSet<(&str, &str)> =
        [("A", "f1"), ("A", "f2"), ("A", "f3"), ("B", "f2"), ("B", "f4")].into_iter().collect();
    assert_eq!(pairs, want);
}

#[test]
fn zero_discount_reports_raw_pmi() {
    let s = selector(SelectorConfig { discount: 0.0, top_k: 0, ..Default::default() }, Shard::all(), &corpus(7, 400));
    for row in s.exact_rows().unwrap() {
        assert_eq!(row.pmi, row.discounted_pmi);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every instance carries one label and one feature, so swapping the two roles is
    /// another valid stream with the same counts.
    #[test]
    fn pmi_is_symmetric_under_role_swap(pairs in prop::collection::vec((0u32..7, 0u32..11), 1..200)) {
        let mut forward = PmiSelector::new(SelectorConfig::default(), Shard::all()).unwrap();
        let mut swapped = PmiSelector::new(SelectorConfig::default(), Shard::all()).unwrap();
        for &(i, j) in &pairs {
            forward.add_positive(&format!("y{i}"), &[format!("x{j}")]).unwrap();
            swapped.add_positive(&format!("x{j}"), &[format!("y{i}")]).unwrap();
        }
        for i in 0..7 {
            for j in 0..11 {
                let (y, x) = (format!("y{i}"), format!("x{j}"));
                match (forward.pmi(&y, &x), swapped.pmi(&x, &y)) {
                    (Some(a), Some(b)) => {
                        prop_assert!((a - b).abs() < 1e-9, "{},{}: {} vs {}", y, x, a, b);
                    }
                    (None, None) => {}
                    other => {
                        return Err(TestCaseError::fail(format!("support differs for {y},{x}: {other:?}")));
                    }
                }
            }
        }
    }

    #[test]
    fn shards_partition_the_feature_space(seed in any::<u64>(), count in 1u32..5) {
        let data = corpus(seed, 300);
        let config = SelectorConfig { top_k: 0, ..Default::default() };
        let whole = selector(config.clone(), Shard::all(), &data);

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut concatenated = Vec::new();
        for index in 0..count {
            let part = selector(config.clone(), Shard::new(index, count).unwrap(), &data);
            prop_assert_eq!(part.instances(), whole.instances());
            for x in part.features().ids() {
                let name = part.features().name(x).to_string();
                prop_assert!(seen.insert(name.clone()), "{} seen by two shards", name);
            }
            concatenated.extend(part.exact_rows().unwrap());
        }
        let all: BTreeSet<String> = whole.features().ids().map(|x| whole.features().name(x).to_string()).collect();
        prop_assert_eq!(seen, all);

        let key = |r: &pmi_core::PmiRow| (r.label.clone(), r.feature.clone(), r.co_occurrence, r.pmi.to_bits());
        let mut expected: Vec<_> = whole.exact_rows().unwrap().iter().map(key).collect();
        let mut merged: Vec<_> = concatenated.iter().map(key).collect();
        expected.sort();
        merged.sort();
        prop_assert_eq!(merged, expected);
    }
}

#[test]
fn approx_matches_exact_until_compaction() {
    let config = SelectorConfig { mode: IndexMode::Both, approx_k: 4, approx_buffer: 1024, ..Default::default() };
    let s = selector(config, Shard::all(), &corpus(11, 300));
    let (exact, approx) = (s.exact().unwrap(), s.approx().unwrap());
    assert_eq!(approx.compactions(), 0);
    for x in s.features().ids() {
        let want = exact.top_pmi_for_feature(x, 4, 2.0, s.labels());
        let got = approx.top_pmi_for_feature(x, 2.0, s.labels());
        assert_eq!(got, want, "feature {}", s.features().name(x));
    }
}

#[test]
fn co_occurrence_never_decreases_across_checkpoints() {
    let data = corpus(13, 600);
    let dir = tempdir().unwrap();
    let paths = CheckpointPaths::new(dir.path(), &Shard::all());
    let config = SelectorConfig { top_k: 0, min_negative_checkpoint: 2, ..Default::default() };
    let mut s = PmiSelector::new(config, Shard::all()).unwrap();
    let mut scheduler = CheckpointScheduler::new(2);
    let mut written: Vec<CheckpointKind> = Vec::new();

    // Positives first, as a pipeline with separate inputs would feed them.
    let (pos, neg): (Vec<_>, Vec<_>) = data.into_iter().partition(|i| i.label.is_some());
    for instance in pos.iter().chain(neg.iter()) {
        let mut due = Vec::new();
        if instance.label.is_none() {
            due.extend(scheduler.before_negative());
        }
        due.iter().for_each(|&k| write_rows(&paths.checkpoint(k), &s.exact_rows().unwrap()).unwrap());
        written.extend(due);
        s.add(instance).unwrap();
        if instance.label.is_some() {
            scheduler.record_positive();
        } else if let Some(k) = scheduler.record_negative() {
            write_rows(&paths.checkpoint(k), &s.exact_rows().unwrap()).unwrap();
            written.push(k);
        }
    }
    for k in scheduler.finish() {
        write_rows(&paths.checkpoint(k), &s.exact_rows().unwrap()).unwrap();
        written.push(k);
    }
    assert_eq!(written.first(), Some(&CheckpointKind::PositivesOnly));
    assert_eq!(written.last(), Some(&CheckpointKind::Final));
    assert!(written.len() > 3);

    let mut last: BTreeMap<(String, String), u64> = BTreeMap::new();
    for kind in written {
        for row in read_rows(&paths.checkpoint(kind)).unwrap() {
            let key = (row.label.clone(), row.feature.clone());
            let prev = last.get(&key).copied().unwrap_or(0);
            assert!(row.co_occurrence >= prev, "{key:?} dropped at {kind}");
            last.insert(key, row.co_occurrence);
        }
    }
}
