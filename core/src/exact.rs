//! Exact co-occurrence counts via inverted lists.
//!
//! Positive instances get an id and are recorded in the inverted list of their label and
//! of each of their features; c(y, x) is the size of the intersection of the two lists.
//! Negative instances are only counted: they never intersect a label list, so per-feature
//! counts carry all the information they contribute to `c(x)` and `N`.

use crate::bloom::BloomGate;
use crate::postings::InvertedList;
use crate::rank::{raw_pmi, select_top_k, Pmi};
use crate::{FeatureAlphabet, FeatureId, InstanceId, LabelAlphabet, LabelId};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-feature counts over negative instances, plus how many negatives were seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegativeCounts {
    counts: FxHashMap<FeatureId, u64>,
    instances: u64,
}

impl NegativeCounts {
    pub fn get(&self, feature: FeatureId) -> u64 {
        self.counts.get(&feature).copied().unwrap_or(0)
    }

    pub fn instances(&self) -> u64 { self.instances }

    /// Number of features seen in at least one negative.
    pub fn len(&self) -> usize { self.counts.len() }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }

    fn add(&mut self, distinct_features: &[FeatureId]) {
        self.instances += 1;
        for &x in distinct_features {
            *self.counts.entry(x).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactCooccurrenceIndex {
    label2instance: FxHashMap<LabelId, InvertedList>,
    feature2instance: FxHashMap<FeatureId, InvertedList>,
    // positive ids are dense, so this doubles as the instance -> label map
    instance_labels: Vec<LabelId>,
    negatives: NegativeCounts,
    gate: BloomGate,
    nnz: u64,
}

/// Bookkeeping from one label scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub candidates: usize,
    pub gated: usize,
    pub kept: usize,
}

impl ExactCooccurrenceIndex {
    pub fn new(bloom_capacity: usize, bloom_max_fpp: f64) -> Self {
        Self {
            label2instance: FxHashMap::default(),
            feature2instance: FxHashMap::default(),
            instance_labels: Vec::new(),
            negatives: NegativeCounts::default(),
            gate: BloomGate::new(bloom_capacity, bloom_max_fpp),
            nnz: 0,
        }
    }

    /// Records a labelled instance and returns its id. Repeated features count once.
    pub fn add_positive_instance(&mut self, label: LabelId, features: &[FeatureId]) -> Result<InstanceId> {
        let instance = InstanceId::try_from(self.instance_labels.len()).context("instance id space exhausted")?;
        self.instance_labels.push(label);
        self.label2instance.entry(label).or_default().push(instance);

        for x in distinct(features) {
            if self.feature2instance.entry(x).or_default().push(instance) {
                self.nnz += 1;
            }
            self.gate.insert(label, x);
        }
        if self.gate.needs_growth() {
            let pairs = observed_pairs(&self.feature2instance, &self.instance_labels);
            self.gate.rebuild(pairs);
        }
        Ok(instance)
    }

    /// Counts an unlabelled instance. No id is assigned and no inverted list is touched.
    pub fn add_negative_instance(&mut self, features: &[FeatureId]) {
        let features: Vec<FeatureId> = distinct(features).collect();
        self.negatives.add(&features);
    }

    pub fn positive_instances(&self) -> u64 { self.instance_labels.len() as u64 }
    pub fn negative_instances(&self) -> u64 { self.negatives.instances() }
    pub fn num_instances(&self) -> u64 { self.positive_instances() + self.negative_instances() }
    pub fn negatives(&self) -> &NegativeCounts { &self.negatives }
    pub fn gate(&self) -> &BloomGate { &self.gate }

    /// Number of (positive instance, feature) postings.
    pub fn nnz(&self) -> u64 { self.nnz }

    pub fn num_labels(&self) -> usize { self.label2instance.len() }
    pub fn num_features(&self) -> usize { self.feature2instance.len() }

    pub fn label_count(&self, label: LabelId) -> u64 {
        self.label2instance.get(&label).map_or(0, |l| l.len() as u64)
    }

    /// Occurrences of `feature` over positive and negative instances.
    pub fn total_feature_count(&self, feature: FeatureId) -> u64 {
        let positive = self.feature2instance.get(&feature).map_or(0, |l| l.len() as u64);
        positive + self.negatives.get(feature)
    }

    pub fn co_occurrence(&self, label: LabelId, feature: FeatureId) -> u64 {
        match (self.label2instance.get(&label), self.feature2instance.get(&feature)) {
            (Some(iy), Some(ix)) => iy.intersection_len(ix) as u64,
            _ => 0,
        }
    }

    pub fn pmi(&self, label: LabelId, feature: FeatureId) -> Option<f64> {
        self.pmi_record(label, feature).map(|p| p.pmi)
    }

    pub fn pmi_record(&self, label: LabelId, feature: FeatureId) -> Option<Pmi> {
        let co = self.co_occurrence(label, feature);
        let pmi = raw_pmi(co, self.num_instances(), self.label_count(label), self.total_feature_count(feature))?;
        Some(Pmi { label, feature, pmi, co_occurrence: co })
    }

    /// Every feature with nonzero co-occurrence with `label`, unordered.
    pub fn pmi_for_label(&self, label: LabelId) -> (Vec<Pmi>, ScanStats) {
        let mut stats = ScanStats::default();
        let iy = match self.label2instance.get(&label) {
            Some(iy) => iy,
            None => return (Vec::new(), stats),
        };
        let n = self.num_instances();
        let cy = iy.len() as u64;
        let mut out = Vec::new();
        for (&x, ix) in &self.feature2instance {
            stats.candidates += 1;
            if !self.gate.might_contain(label, x) {
                stats.gated += 1;
                continue;
            }
            let co = iy.intersection_len(ix) as u64;
            let cx = ix.len() as u64 + self.negatives.get(x);
            if let Some(pmi) = raw_pmi(co, n, cy, cx) {
                out.push(Pmi { label, feature: x, pmi, co_occurrence: co });
            }
        }
        stats.kept = out.len();
        (out, stats)
    }

    /// Best `k` features for `label` (`k == 0` keeps all), ordered by discounted PMI.
    pub fn top_pmi_for_label(&self, label: LabelId, k: usize, lambda: f64, features: &FeatureAlphabet) -> Vec<Pmi> {
        let (records, stats) = self.pmi_for_label(label);
        tracing::debug!(
            label = label.0,
            label_instances = self.label_count(label),
            candidates = stats.candidates,
            gated = stats.gated,
            kept = stats.kept,
            "scanned label"
        );
        select_top_k(records, k, lambda, |p| features.name(p.feature))
    }

    /// Best `k` labels for one feature, in the same order rule.
    pub fn top_pmi_for_feature(&self, feature: FeatureId, k: usize, lambda: f64, labels: &LabelAlphabet) -> Vec<Pmi> {
        let mut ids: Vec<LabelId> = self.label2instance.keys().copied().collect();
        ids.sort_unstable();
        let records = ids
            .into_iter()
            .filter(|&y| self.gate.might_contain(y, feature))
            .filter_map(|y| self.pmi_record(y, feature))
            .collect();
        select_top_k(records, k, lambda, |p| labels.name(p.label))
    }

    /// Labels with at least one positive instance, in id order.
    pub fn labels(&self) -> Vec<LabelId> {
        let mut ids: Vec<LabelId> = self.label2instance.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn approx_heap_bytes(&self) -> usize {
        let entry = std::mem::size_of::<InvertedList>() + std::mem::size_of::<u32>() + 8;
        let lists: usize = self
            .label2instance
            .values()
            .chain(self.feature2instance.values())
            .map(|l| l.approx_heap_bytes() + entry)
            .sum();
        lists
            + self.instance_labels.capacity() * std::mem::size_of::<LabelId>()
            + self.negatives.counts.capacity() * (std::mem::size_of::<FeatureId>() + std::mem::size_of::<u64>() + 8)
            + self.gate.approx_heap_bytes()
    }
}

fn distinct(features: &[FeatureId]) -> impl Iterator<Item = FeatureId> {
    let mut v = features.to_vec();
    v.sort_unstable();
    v.dedup();
    v.into_iter()
}

/// Every distinct (label, feature) pair present in the positive lists.
fn observed_pairs(
    feature2instance: &FxHashMap<FeatureId, InvertedList>,
    instance_labels: &[LabelId],
) -> Vec<(LabelId, FeatureId)> {
    let mut pairs = Vec::new();
    let mut labels = Vec::new();
    for (&x, ix) in feature2instance {
        labels.clear();
        labels.extend(ix.iter().filter_map(|i| instance_labels.get(i as usize).copied()));
        labels.sort_unstable();
        labels.dedup();
        pairs.extend(labels.iter().map(|&y| (y, x)));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: LabelId = LabelId(0);
    const B: LabelId = LabelId(1);

    fn f(i: u32) -> FeatureId {
        FeatureId(i)
    }

    fn small_index() -> ExactCooccurrenceIndex {
        let mut idx = ExactCooccurrenceIndex::new(64, 1e-4);
        idx.add_positive_instance(A, &[f(1), f(2)]).unwrap();
        idx.add_positive_instance(A, &[f(1), f(3)]).unwrap();
        idx.add_positive_instance(B, &[f(2), f(4)]).unwrap();
        idx.add_negative_instance(&[f(1)]);
        idx.add_negative_instance(&[f(5)]);
        idx
    }

    #[test]
    fn counts_positives_and_negatives() {
        let idx = small_index();
        assert_eq!(idx.num_instances(), 5);
        assert_eq!(idx.positive_instances(), 3);
        assert_eq!(idx.negative_instances(), 2);
        assert_eq!(idx.label_count(A), 2);
        assert_eq!(idx.total_feature_count(f(1)), 3);
        assert_eq!(idx.total_feature_count(f(5)), 1);
        assert_eq!(idx.co_occurrence(A, f(1)), 2);
        assert_eq!(idx.co_occurrence(A, f(4)), 0);
        assert_eq!(idx.nnz(), 6);
    }

    #[test]
    fn pmi_follows_the_count_formula() {
        let idx = small_index();
        let expected = 2f64.ln() + 5f64.ln() - 2f64.ln() - 3f64.ln();
        assert!((idx.pmi(A, f(1)).unwrap() - expected).abs() < 1e-9);
        assert_eq!(idx.pmi(A, f(4)), None);
        assert_eq!(idx.pmi(A, f(5)), None);
    }

    #[test]
    fn duplicate_features_count_once() {
        let mut idx = ExactCooccurrenceIndex::new(64, 1e-4);
        idx.add_positive_instance(A, &[f(1), f(1), f(1)]).unwrap();
        idx.add_negative_instance(&[f(1), f(1)]);
        assert_eq!(idx.total_feature_count(f(1)), 2);
        assert_eq!(idx.co_occurrence(A, f(1)), 1);
    }

    #[test]
    fn label_scan_skips_unsupported_pairs() {
        let idx = small_index();
        let (records, stats) = idx.pmi_for_label(A);
        let mut features: Vec<u32> = records.iter().map(|p| p.feature.0).collect();
        features.sort_unstable();
        assert_eq!(features, vec![1, 2, 3]);
        assert_eq!(stats.candidates, 4);
        assert!(records.iter().all(|p| p.pmi.is_finite()));
    }

    #[test]
    fn gate_growth_keeps_label_scans_complete() {
        let mut idx = ExactCooccurrenceIndex::new(8, 1e-4);
        for i in 0..400u32 {
            let label = LabelId(i % 3);
            idx.add_positive_instance(label, &[f(i), f(i + 1), f(1000 + i % 7)]).unwrap();
        }
        assert!(idx.gate().rebuilds() > 0);
        for y in 0..3 {
            let (records, _) = idx.pmi_for_label(LabelId(y));
            let brute = (0..2000u32).filter(|&x| idx.co_occurrence(LabelId(y), f(x)) > 0).count();
            assert_eq!(records.len(), brute);
        }
    }
}
