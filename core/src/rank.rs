//! PMI arithmetic and top-K selection.
//!
//! `pmi(y, x) = ln c(y,x) + ln N - ln c(y) - ln c(x)`, scored for ranking as
//! `pmi * c(y,x) / (c(y,x) + lambda)` so that rare pairs do not float to the top.

use crate::{FeatureId, LabelId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One scored (label, feature) pair, by id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pmi {
    pub label: LabelId,
    pub feature: FeatureId,
    pub pmi: f64,
    pub co_occurrence: u64,
}

impl Pmi {
    pub fn discounted(&self, lambda: f64) -> f64 {
        discounted_pmi(self.pmi, self.co_occurrence, lambda)
    }
}

/// Raw PMI from counts. `None` when any count is zero, i.e. the pair has no support.
pub fn raw_pmi(co_occurrence: u64, instances: u64, label_count: u64, feature_count: u64) -> Option<f64> {
    if co_occurrence == 0 || instances == 0 || label_count == 0 || feature_count == 0 {
        return None;
    }
    let pmi = (co_occurrence as f64).ln() + (instances as f64).ln()
        - (label_count as f64).ln()
        - (feature_count as f64).ln();
    pmi.is_finite().then_some(pmi)
}

pub fn discounted_pmi(raw: f64, co_occurrence: u64, lambda: f64) -> f64 {
    if lambda == 0.0 {
        return raw;
    }
    let c = co_occurrence as f64;
    raw * (c / (c + lambda))
}

/// Output order: higher discounted PMI first, then higher co-occurrence, then name.
pub fn rank_cmp(a: (f64, u64, &str), b: (f64, u64, &str)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.cmp(&a.1))
        .then_with(|| a.2.cmp(b.2))
}

/// Best `k` records in output order (`k == 0` keeps all). `name` supplies the tie-break
/// string, the feature name when ranking features for a label and vice versa.
pub fn select_top_k<'a, F>(mut records: Vec<Pmi>, k: usize, lambda: f64, name: F) -> Vec<Pmi>
where
    F: Fn(&Pmi) -> &'a str,
{
    let cmp = |a: &Pmi, b: &Pmi| {
        rank_cmp(
            (a.discounted(lambda), a.co_occurrence, name(a)),
            (b.discounted(lambda), b.co_occurrence, name(b)),
        )
    };
    if k > 0 && records.len() > k {
        records.select_nth_unstable_by(k - 1, cmp);
        records.truncate(k);
    }
    records.sort_by(cmp);
    records
}

/// A ranked pair resolved to names, as written to checkpoint files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmiRow {
    pub label: String,
    pub feature: String,
    pub pmi: f64,
    pub discounted_pmi: f64,
    pub co_occurrence: u64,
    pub instances: u64,
}

impl PmiRow {
    fn rank_key(&self) -> (f64, u64, &str) {
        (self.discounted_pmi, self.co_occurrence, self.feature.as_str())
    }
}

/// Combines per-shard outputs: rows are regrouped by label and each label is cut back to
/// its best `k` (`k == 0` keeps all). Shards own disjoint features, so no pair can appear
/// twice and nothing needs summing.
pub fn merge_top_k(rows: Vec<PmiRow>, k: usize) -> Vec<PmiRow> {
    let mut by_label: BTreeMap<String, Vec<PmiRow>> = BTreeMap::new();
    for row in rows {
        by_label.entry(row.label.clone()).or_default().push(row);
    }
    let mut out = Vec::new();
    for (_, mut group) in by_label {
        group.sort_by(|a, b| rank_cmp(a.rank_key(), b.rank_key()));
        if k > 0 {
            group.truncate(k);
        }
        out.extend(group);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(feature: u32, pmi: f64, co: u64) -> Pmi {
        Pmi { label: LabelId(0), feature: FeatureId(feature), pmi, co_occurrence: co }
    }

    #[test]
    fn raw_pmi_matches_hand_computation() {
        // ln 2 + ln 5 - ln 2 - ln 3
        let p = raw_pmi(2, 5, 2, 3).unwrap();
        assert!((p - (5.0f64 / 3.0).ln()).abs() < 1e-9);
        assert!((p - 0.5108256237659907).abs() < 1e-9);
    }

    #[test]
    fn zero_support_is_excluded() {
        assert_eq!(raw_pmi(0, 5, 2, 3), None);
        assert_eq!(raw_pmi(1, 5, 0, 3), None);
        assert_eq!(raw_pmi(1, 0, 1, 1), None);
    }

    #[test]
    fn raw_pmi_is_symmetric_in_marginals() {
        for (c, n, a, b) in [(1u64, 10u64, 2u64, 7u64), (3, 100, 3, 50), (9, 9, 9, 9)] {
            let p = raw_pmi(c, n, a, b).unwrap();
            let q = raw_pmi(c, n, b, a).unwrap();
            assert!((p - q).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_lambda_is_raw() {
        for (raw, co) in [(1.5, 1u64), (-0.3, 7), (0.0, 2)] {
            assert_eq!(discounted_pmi(raw, co, 0.0), raw);
        }
        assert!((discounted_pmi(2.0, 2, 2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn top_k_orders_with_deterministic_ties() {
        let names = ["zeta", "alpha", "mid", "beta"];
        let records = vec![rec(0, 1.0, 3), rec(1, 1.0, 3), rec(2, 2.0, 1), rec(3, 1.0, 5)];
        let top = select_top_k(records, 3, 0.0, |p| names[p.feature.0 as usize]);
        let order: Vec<u32> = top.iter().map(|p| p.feature.0).collect();
        // 2 has the best score; 3 wins on co-occurrence; alpha < zeta
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn discount_can_reorder() {
        let names = ["rare", "common"];
        let records = vec![rec(0, 2.0, 1), rec(1, 1.5, 20)];
        let raw = select_top_k(records.clone(), 0, 0.0, |p| names[p.feature.0 as usize]);
        assert_eq!(raw[0].feature, FeatureId(0));
        let discounted = select_top_k(records, 0, 2.0, |p| names[p.feature.0 as usize]);
        assert_eq!(discounted[0].feature, FeatureId(1));
    }

    #[test]
    fn merge_truncates_per_label() {
        let row = |label: &str, feature: &str, d: f64| PmiRow {
            label: label.into(),
            feature: feature.into(),
            pmi: d,
            discounted_pmi: d,
            co_occurrence: 1,
            instances: 10,
        };
        let merged = merge_top_k(
            vec![row("B", "x", 0.5), row("A", "f1", 0.1), row("A", "f2", 0.9), row("A", "f3", 0.4)],
            2,
        );
        let got: Vec<(&str, &str)> = merged.iter().map(|r| (r.label.as_str(), r.feature.as_str())).collect();
        assert_eq!(got, vec![("A", "f2"), ("A", "f3"), ("B", "x")]);
    }
}
