use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Which co-occurrence structure(s) a run maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    #[default]
    Exact,
    Approx,
    Both,
}

impl IndexMode {
    pub fn uses_exact(&self) -> bool { matches!(self, IndexMode::Exact | IndexMode::Both) }
    pub fn uses_approx(&self) -> bool { matches!(self, IndexMode::Approx | IndexMode::Both) }
}

impl FromStr for IndexMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(IndexMode::Exact),
            "approx" => Ok(IndexMode::Approx),
            "both" => Ok(IndexMode::Both),
            other => bail!("unknown mode {other:?}, expected exact, approx or both"),
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexMode::Exact => "exact",
            IndexMode::Approx => "approx",
            IndexMode::Both => "both",
        })
    }
}

/// Knobs for one selection run. Supplied by the caller, never read from globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Features kept per label; 0 keeps every supported pair.
    pub top_k: usize,
    /// Frequency discount lambda; 0 ranks by raw PMI.
    pub discount: f64,
    pub mode: IndexMode,
    pub approx_k: usize,
    /// Distinct labels a feature may buffer before it is compacted.
    pub approx_buffer: usize,
    pub bloom_capacity: usize,
    /// Estimated false positive rate at which the bloom gate grows.
    pub bloom_max_fpp: f64,
    /// Smallest negative count that gets its own checkpoint.
    pub min_negative_checkpoint: u64,
    /// Labels counted but never written out.
    pub skip_labels: BTreeSet<String>,
    /// Keep only features starting with one of these; empty keeps all.
    pub feature_prefixes: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            top_k: 300,
            discount: 2.0,
            mode: IndexMode::Exact,
            approx_k: 16,
            approx_buffer: 128,
            bloom_capacity: 4096,
            bloom_max_fpp: 1e-4,
            min_negative_checkpoint: 8,
            skip_labels: BTreeSet::new(),
            feature_prefixes: Vec::new(),
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.discount.is_finite() || self.discount < 0.0 {
            bail!("discount must be a finite non-negative number, got {}", self.discount);
        }
        if self.approx_k == 0 {
            bail!("approx_k must be positive");
        }
        if self.approx_buffer == 0 {
            bail!("approx_buffer must be positive");
        }
        if self.bloom_capacity == 0 {
            bail!("bloom_capacity must be positive");
        }
        if !(self.bloom_max_fpp > 0.0 && self.bloom_max_fpp < 1.0) {
            bail!("bloom_max_fpp must lie in (0, 1), got {}", self.bloom_max_fpp);
        }
        Ok(())
    }

    pub fn keeps_feature(&self, feature: &str) -> bool {
        self.feature_prefixes.is_empty() || self.feature_prefixes.iter().any(|p| feature.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SelectorConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            SelectorConfig { discount: -1.0, ..Default::default() },
            SelectorConfig { discount: f64::NAN, ..Default::default() },
            SelectorConfig { approx_k: 0, ..Default::default() },
            SelectorConfig { bloom_max_fpp: 1.5, ..Default::default() },
            SelectorConfig { bloom_capacity: 0, ..Default::default() },
        ];
        for c in bad {
            assert!(c.validate().is_err(), "{c:?}");
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: SelectorConfig = serde_json::from_str(r#"{"top_k": 10, "mode": "both"}"#).unwrap();
        assert_eq!(c.top_k, 10);
        assert_eq!(c.mode, IndexMode::Both);
        assert_eq!(c.approx_buffer, 128);
    }

    #[test]
    fn prefix_filter() {
        let c = SelectorConfig { feature_prefixes: vec!["p/".into()], ..Default::default() };
        assert!(c.keeps_feature("p/x"));
        assert!(!c.keeps_feature("w/x"));
        assert!(SelectorConfig::default().keeps_feature("anything"));
    }
}
