//! Probabilistic gate over the (label, feature) pairs seen in positive instances.
//!
//! A label scan asks the gate before paying for a list intersection. False positives only
//! cost an intersection; a false negative would silently drop a real pair, so the filter
//! can only be resized through [`BloomGate::rebuild`], which takes the complete member set.

use crate::{FeatureId, LabelId};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomGate {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    set_bits: u64,
    capacity: usize,
    max_fpp: f64,
    rebuilds: u32,
}

impl BloomGate {
    /// Gate sized so that `capacity` distinct pairs reach roughly `max_fpp`.
    pub fn new(capacity: usize, max_fpp: f64) -> Self {
        let capacity = capacity.max(1);
        let max_fpp = if max_fpp > 0.0 && max_fpp < 1.0 { max_fpp } else { 1e-4 };
        let num_bits = optimal_bits(capacity, max_fpp).max(64);
        let num_hashes = optimal_hashes(num_bits, capacity);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
            set_bits: 0,
            capacity,
            max_fpp,
            rebuilds: 0,
        }
    }

    pub fn insert(&mut self, label: LabelId, feature: FeatureId) {
        let (h1, h2) = pair_hashes(label, feature);
        for i in 0..u64::from(self.num_hashes) {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            let word = (bit / 64) as usize;
            let mask = 1u64 << (bit % 64);
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                self.set_bits += 1;
            }
        }
    }

    /// False means the pair was definitely never inserted.
    pub fn might_contain(&self, label: LabelId, feature: FeatureId) -> bool {
        let (h1, h2) = pair_hashes(label, feature);
        (0..u64::from(self.num_hashes)).all(|i| {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }

    /// False positive probability implied by the current fill ratio.
    pub fn estimated_fpp(&self) -> f64 {
        let fill = self.set_bits as f64 / self.num_bits as f64;
        fill.powi(self.num_hashes as i32)
    }

    pub fn needs_growth(&self) -> bool {
        self.estimated_fpp() > self.max_fpp
    }

    /// Reallocates at a larger capacity and re-inserts `members`, which must be every pair
    /// inserted so far. Returns the number of pairs replayed.
    pub fn rebuild<I>(&mut self, members: I) -> usize
    where
        I: IntoIterator<Item = (LabelId, FeatureId)>,
    {
        let members: Vec<(LabelId, FeatureId)> = members.into_iter().collect();
        let capacity = (self.capacity * 2).max(members.len() * 2);
        let mut next = BloomGate::new(capacity, self.max_fpp);
        next.rebuilds = self.rebuilds + 1;
        for &(label, feature) in &members {
            next.insert(label, feature);
        }
        tracing::debug!(
            capacity,
            bits = next.num_bits,
            hashes = next.num_hashes,
            replayed = members.len(),
            "grew label/feature bloom gate"
        );
        *self = next;
        members.len()
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn num_bits(&self) -> u64 { self.num_bits }
    pub fn rebuilds(&self) -> u32 { self.rebuilds }

    pub fn approx_heap_bytes(&self) -> usize {
        self.bits.capacity() * std::mem::size_of::<u64>()
    }
}

fn optimal_bits(capacity: usize, fpp: f64) -> u64 {
    let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
    (-(capacity as f64) * fpp.ln() / ln2_sq).ceil() as u64
}

fn optimal_hashes(num_bits: u64, capacity: usize) -> u32 {
    let k = (num_bits as f64 / capacity as f64) * std::f64::consts::LN_2;
    (k.round() as u32).max(1)
}

fn pair_hashes(label: LabelId, feature: FeatureId) -> (u64, u64) {
    let seeded = |seed: u32| {
        let mut hasher = FxHasher::default();
        seed.hash(&mut hasher);
        label.hash(&mut hasher);
        feature.hash(&mut hasher);
        mix64(hasher.finish())
    };
    // odd step so the probe sequence never collapses onto one bit
    (seeded(0), seeded(1) | 1)
}

// splitmix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(y: u32, x: u32) -> (LabelId, FeatureId) {
        (LabelId(y), FeatureId(x))
    }

    #[test]
    fn inserted_pairs_are_found() {
        let mut gate = BloomGate::new(1000, 0.01);
        gate.insert(LabelId(1), FeatureId(7));
        assert!(gate.might_contain(LabelId(1), FeatureId(7)));
        assert!(!gate.needs_growth());
    }

    #[test]
    fn false_positive_rate_near_target() {
        let mut gate = BloomGate::new(1000, 0.01);
        for x in 0..1000 {
            gate.insert(LabelId(0), FeatureId(x));
        }
        let false_positives = (1000..11_000).filter(|&x| gate.might_contain(LabelId(0), FeatureId(x))).count();
        let fpr = false_positives as f64 / 10_000.0;
        assert!(fpr < 0.05, "false positive rate {fpr}");
    }

    #[test]
    fn growth_keeps_every_member() {
        let mut gate = BloomGate::new(16, 1e-4);
        let mut members = Vec::new();
        for y in 0..20 {
            for x in 0..500 {
                let (label, feature) = pair(y, x * 31 + y);
                gate.insert(label, feature);
                members.push((label, feature));
                if gate.needs_growth() {
                    gate.rebuild(members.iter().copied());
                }
            }
        }
        assert!(gate.rebuilds() > 0);
        assert!(gate.capacity() >= members.len());
        for &(label, feature) in &members {
            assert!(gate.might_contain(label, feature), "lost {label:?} {feature:?}");
        }
    }

    #[test]
    fn fill_estimate_grows_with_inserts() {
        let mut gate = BloomGate::new(100, 1e-3);
        assert_eq!(gate.estimated_fpp(), 0.0);
        for x in 0..500 {
            gate.insert(LabelId(2), FeatureId(x));
        }
        assert!(gate.needs_growth());
    }
}
