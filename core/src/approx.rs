//! Memory-bounded approximate co-occurrence counts.
//!
//! Each feature keeps at most `k` (label, count) entries plus a buffer of counts gathered
//! since its last compaction. When the buffer holds more than `max_buffer` labels, the
//! buffer is folded into the kept entries, every candidate is scored with the global
//! totals *as of that moment*, and only the best `k` survive. Memory is therefore
//! O(features * (k + max_buffer)) however many occurrences stream past.
//!
//! Error is one-sided. Counts of a label dropped at a compaction are gone for good: if the
//! label comes back it starts again from zero, so its co-occurrence can only be
//! under-reported. Compaction-time scores also use totals that later grow, so an early
//! compaction may keep a label that the final totals would not have preferred. A feature
//! whose buffer never overflows is never compacted and reports exact counts.

use crate::rank::{raw_pmi, select_top_k, Pmi};
use crate::{FeatureId, LabelAlphabet, LabelId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// At most `capacity` entries, kept sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedMap<K, V> {
    entries: Vec<(K, V)>,
    capacity: usize,
}

impl<K: Ord + Copy, V: Copy> BoundedMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity }
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn is_full(&self) -> bool { self.entries.len() >= self.capacity }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Inserts or overwrites. Returns false, leaving the map unchanged, when `key` is new
    /// and the map is full.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => {
                self.entries[i].1 = value;
                true
            }
            Err(_) if self.is_full() => false,
            Err(i) => {
                if self.entries.capacity() == 0 {
                    self.entries.reserve_exact(self.capacity);
                }
                self.entries.insert(i, (key, value));
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.iter().copied()
    }

    pub fn approx_heap_bytes(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<(K, V)>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeatureTops {
    occurrences: u64,
    top: BoundedMap<LabelId, u32>,
    buffer: FxHashMap<LabelId, u32>,
}

impl FeatureTops {
    fn new(k: usize) -> Self {
        Self { occurrences: 0, top: BoundedMap::new(k), buffer: FxHashMap::default() }
    }

    /// Kept entries plus buffered counts, by label.
    fn merged_counts(&self) -> Vec<(LabelId, u64)> {
        let mut merged: Vec<(LabelId, u64)> = self.top.iter().map(|(y, c)| (y, u64::from(c))).collect();
        for (&y, &c) in &self.buffer {
            match merged.iter_mut().find(|(label, _)| *label == y) {
                Some((_, count)) => *count += u64::from(c),
                None => merged.push((y, u64::from(c))),
            }
        }
        merged.sort_unstable_by_key(|&(y, _)| y);
        merged
    }

    /// Folds the buffer into the kept entries; returns how many labels were dropped.
    fn compact(&mut self, k: usize, label_counts: &FxHashMap<LabelId, u64>, instances: u64) -> usize {
        let cx = self.occurrences;
        let mut scored: Vec<(LabelId, u64, f64)> = self
            .merged_counts()
            .into_iter()
            .filter_map(|(y, c)| {
                let cy = label_counts.get(&y).copied().unwrap_or(0);
                raw_pmi(c, instances, cy, cx).map(|pmi| (y, c, pmi))
            })
            .collect();
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| b.1.cmp(&a.1)).then_with(|| a.0.cmp(&b.0)));
        let dropped = scored.len().saturating_sub(k);
        scored.truncate(k);

        self.top.clear();
        for (y, c, _) in scored {
            self.top.insert(y, u32::try_from(c).unwrap_or(u32::MAX));
        }
        // release the buffer's allocation, not just its contents
        self.buffer = FxHashMap::default();
        dropped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproximateCooccurrenceIndex {
    k: usize,
    max_buffer: usize,
    features: FxHashMap<FeatureId, FeatureTops>,
    label_counts: FxHashMap<LabelId, u64>,
    instances: u64,
    compactions: u64,
    dropped_labels: u64,
}

impl ApproximateCooccurrenceIndex {
    pub fn new(k: usize, max_buffer: usize) -> Self {
        Self {
            k: k.max(1),
            max_buffer: max_buffer.max(1),
            features: FxHashMap::default(),
            label_counts: FxHashMap::default(),
            instances: 0,
            compactions: 0,
            dropped_labels: 0,
        }
    }

    pub fn add_instance(&mut self, label: LabelId, features: &[FeatureId]) {
        self.instances += 1;
        *self.label_counts.entry(label).or_insert(0) += 1;

        let mut xs = features.to_vec();
        xs.sort_unstable();
        xs.dedup();
        for x in xs {
            let k = self.k;
            let tops = self.features.entry(x).or_insert_with(|| FeatureTops::new(k));
            tops.occurrences += 1;
            let count = tops.buffer.entry(label).or_insert(0);
            *count = count.saturating_add(1);
            if tops.buffer.len() > self.max_buffer {
                let dropped = tops.compact(k, &self.label_counts, self.instances);
                self.compactions += 1;
                self.dropped_labels += dropped as u64;
                tracing::trace!(feature = x.0, dropped, "compacted feature");
            }
        }
    }

    /// An unlabelled instance only moves N and the features' occurrence totals.
    pub fn add_negative_instance(&mut self, features: &[FeatureId]) {
        self.instances += 1;
        let mut xs = features.to_vec();
        xs.sort_unstable();
        xs.dedup();
        for x in xs {
            let k = self.k;
            self.features.entry(x).or_insert_with(|| FeatureTops::new(k)).occurrences += 1;
        }
    }

    pub fn k(&self) -> usize { self.k }
    pub fn num_instances(&self) -> u64 { self.instances }
    pub fn num_features(&self) -> usize { self.features.len() }
    pub fn compactions(&self) -> u64 { self.compactions }
    pub fn dropped_labels(&self) -> u64 { self.dropped_labels }

    pub fn label_count(&self, label: LabelId) -> u64 {
        self.label_counts.get(&label).copied().unwrap_or(0)
    }

    pub fn total_feature_count(&self, feature: FeatureId) -> u64 {
        self.features.get(&feature).map_or(0, |t| t.occurrences)
    }

    /// Retained co-occurrence estimate; never above the true count.
    pub fn co_occurrence(&self, label: LabelId, feature: FeatureId) -> u64 {
        self.features.get(&feature).map_or(0, |t| {
            t.merged_counts().into_iter().find(|&(y, _)| y == label).map_or(0, |(_, c)| c)
        })
    }

    /// Best `k` labels for one feature, scored with the current totals.
    pub fn top_pmi_for_feature(&self, feature: FeatureId, lambda: f64, labels: &LabelAlphabet) -> Vec<Pmi> {
        let tops = match self.features.get(&feature) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let records = tops
            .merged_counts()
            .into_iter()
            .filter_map(|(y, c)| {
                let pmi = raw_pmi(c, self.instances, self.label_count(y), tops.occurrences)?;
                Some(Pmi { label: y, feature, pmi, co_occurrence: c })
            })
            .collect();
        select_top_k(records, self.k, lambda, |p| labels.name(p.label))
    }

    /// Every retained pair, feature by feature in id order.
    pub fn top_pmi(&self, lambda: f64, labels: &LabelAlphabet) -> Vec<Pmi> {
        let mut ids: Vec<FeatureId> = self.features.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .flat_map(|x| self.top_pmi_for_feature(x, lambda, labels))
            .collect()
    }

    pub fn approx_heap_bytes(&self) -> usize {
        let per_entry = std::mem::size_of::<FeatureId>() + std::mem::size_of::<FeatureTops>() + 8;
        self.features
            .values()
            .map(|t| {
                per_entry
                    + t.top.approx_heap_bytes()
                    + t.buffer.capacity() * (std::mem::size_of::<LabelId>() + std::mem::size_of::<u32>() + 8)
            })
            .sum::<usize>()
            + self.label_counts.capacity() * 24
    }
}
