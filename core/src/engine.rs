//! The owned state of one selection run: both alphabets, the shard filter and whichever
//! co-occurrence indexes the configuration asks for. Ingestion and ranking go through
//! here so that feature identity always comes from the alphabet, never from a hash.

use crate::approx::ApproximateCooccurrenceIndex;
use crate::config::SelectorConfig;
use crate::exact::ExactCooccurrenceIndex;
use crate::instance::{Instance, InstanceClass};
use crate::rank::{rank_cmp, Pmi, PmiRow};
use crate::{FeatureAlphabet, FeatureId, LabelAlphabet, LabelId, Shard};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmiSelector {
    config: SelectorConfig,
    shard: Shard,
    labels: LabelAlphabet,
    features: FeatureAlphabet,
    exact: Option<ExactCooccurrenceIndex>,
    approx: Option<ApproximateCooccurrenceIndex>,
    positives: u64,
    negatives: u64,
    filtered_features: u64,
}

/// Size and progress figures for operators watching a long run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub positives: u64,
    pub negatives: u64,
    pub labels: usize,
    pub features: usize,
    pub nnz: u64,
    pub negative_features: usize,
    pub bloom_bits: u64,
    pub bloom_fpp: f64,
    pub bloom_rebuilds: u32,
    pub approx_features: usize,
    pub compactions: u64,
    pub dropped_labels: u64,
    pub filtered_features: u64,
    pub approx_heap_bytes: usize,
}

impl IndexStats {
    pub fn log(&self, stage: &str) {
        tracing::info!(
            stage,
            positives = self.positives,
            negatives = self.negatives,
            instances = self.positives + self.negatives,
            labels = self.labels,
            features = self.features,
            nnz = self.nnz,
            negative_features = self.negative_features,
            bloom_bits = self.bloom_bits,
            bloom_fpp = self.bloom_fpp,
            bloom_rebuilds = self.bloom_rebuilds,
            approx_features = self.approx_features,
            compactions = self.compactions,
            dropped_labels = self.dropped_labels,
            filtered_features = self.filtered_features,
            heap_mb = self.approx_heap_bytes / (1 << 20),
            "progress"
        );
    }
}

impl PmiSelector {
    pub fn new(config: SelectorConfig, shard: Shard) -> Result<Self> {
        config.validate()?;
        let exact = config
            .mode
            .uses_exact()
            .then(|| ExactCooccurrenceIndex::new(config.bloom_capacity, config.bloom_max_fpp));
        let approx = config
            .mode
            .uses_approx()
            .then(|| ApproximateCooccurrenceIndex::new(config.approx_k, config.approx_buffer));
        Ok(Self {
            config,
            shard,
            labels: LabelAlphabet::new(),
            features: FeatureAlphabet::new(),
            exact,
            approx,
            positives: 0,
            negatives: 0,
            filtered_features: 0,
        })
    }

    pub fn add(&mut self, instance: &Instance) -> Result<InstanceClass> {
        match &instance.label {
            Some(label) => {
                self.add_positive(label, &instance.features)?;
                Ok(InstanceClass::Positive)
            }
            None => {
                self.add_negative(&instance.features)?;
                Ok(InstanceClass::Negative)
            }
        }
    }

    pub fn add_positive<S: AsRef<str>>(&mut self, label: &str, features: &[S]) -> Result<()> {
        if label.is_empty() {
            bail!("positive instance with an empty label");
        }
        let y = self.labels.lookup_index(label, true).context("label alphabet is full")?;
        let xs = self.admit(features)?;
        if let Some(exact) = &mut self.exact {
            exact.add_positive_instance(y, &xs)?;
        }
        if let Some(approx) = &mut self.approx {
            approx.add_instance(y, &xs);
        }
        self.positives += 1;
        Ok(())
    }

    pub fn add_negative<S: AsRef<str>>(&mut self, features: &[S]) -> Result<()> {
        let xs = self.admit(features)?;
        if let Some(exact) = &mut self.exact {
            exact.add_negative_instance(&xs);
        }
        if let Some(approx) = &mut self.approx {
            approx.add_negative_instance(&xs);
        }
        self.negatives += 1;
        Ok(())
    }

    /// Drops features outside this shard or the prefix allow-list, interns the rest.
    fn admit<S: AsRef<str>>(&mut self, features: &[S]) -> Result<Vec<FeatureId>> {
        let mut xs = Vec::with_capacity(features.len());
        for f in features {
            let f = f.as_ref();
            if !self.config.keeps_feature(f) || !self.shard.matches(f) {
                self.filtered_features += 1;
                continue;
            }
            xs.push(self.features.lookup_index(f, true).context("feature alphabet is full")?);
        }
        Ok(xs)
    }

    pub fn config(&self) -> &SelectorConfig { &self.config }
    pub fn shard(&self) -> Shard { self.shard }
    pub fn labels(&self) -> &LabelAlphabet { &self.labels }
    pub fn features(&self) -> &FeatureAlphabet { &self.features }
    pub fn exact(&self) -> Option<&ExactCooccurrenceIndex> { self.exact.as_ref() }
    pub fn approx(&self) -> Option<&ApproximateCooccurrenceIndex> { self.approx.as_ref() }
    pub fn positives(&self) -> u64 { self.positives }
    pub fn negatives(&self) -> u64 { self.negatives }
    pub fn instances(&self) -> u64 { self.positives + self.negatives }

    /// Exact PMI by name; `None` without an exact index or without support.
    pub fn pmi(&self, label: &str, feature: &str) -> Option<f64> {
        let exact = self.exact.as_ref()?;
        exact.pmi(self.labels.get(label)?, self.features.get(feature)?)
    }

    pub fn co_occurrence(&self, label: &str, feature: &str) -> u64 {
        match (self.labels.get(label), self.features.get(feature)) {
            (Some(y), Some(x)) => {
                if let Some(exact) = &self.exact {
                    exact.co_occurrence(y, x)
                } else if let Some(approx) = &self.approx {
                    approx.co_occurrence(y, x)
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Resolves a scored pair to names; an id missing from either alphabet is an error.
    fn to_row(&self, p: &Pmi) -> Result<PmiRow> {
        let label = self
            .labels
            .lookup_object(p.label)
            .with_context(|| format!("label id {} not in alphabet", p.label.0))?;
        let feature = self
            .features
            .lookup_object(p.feature)
            .with_context(|| format!("feature id {} not in alphabet", p.feature.0))?;
        Ok(PmiRow {
            label: label.to_string(),
            feature: feature.to_string(),
            pmi: p.pmi,
            discounted_pmi: p.discounted(self.config.discount),
            co_occurrence: p.co_occurrence,
            instances: self.instances(),
        })
    }

    fn skipped(&self, label: LabelId) -> bool {
        self.labels.lookup_object(label).is_some_and(|name| self.config.skip_labels.contains(name))
    }

    /// Top-K features per label from the exact index, labels in id order.
    pub fn exact_rows(&self) -> Result<Vec<PmiRow>> {
        let exact = match &self.exact {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let mut rows = Vec::new();
        for y in exact.labels() {
            if self.skipped(y) {
                continue;
            }
            let top = exact.top_pmi_for_label(y, self.config.top_k, self.config.discount, &self.features);
            for p in &top {
                rows.push(self.to_row(p)?);
            }
        }
        Ok(rows)
    }

    /// Approximate pairs regrouped by label and cut to the top-K per label.
    pub fn approx_rows(&self) -> Result<Vec<PmiRow>> {
        let approx = match &self.approx {
            Some(a) => a,
            None => return Ok(Vec::new()),
        };
        let lambda = self.config.discount;
        let mut pairs: Vec<Pmi> = approx
            .top_pmi(lambda, &self.labels)
            .into_iter()
            .filter(|p| !self.skipped(p.label))
            .collect();
        pairs.sort_by(|a, b| {
            a.label.cmp(&b.label).then_with(|| {
                rank_cmp(
                    (a.discounted(lambda), a.co_occurrence, self.features.name(a.feature)),
                    (b.discounted(lambda), b.co_occurrence, self.features.name(b.feature)),
                )
            })
        });
        let mut rows = Vec::with_capacity(pairs.len());
        let mut run = 0usize;
        for (i, p) in pairs.iter().enumerate() {
            run = if i > 0 && pairs[i - 1].label == p.label { run + 1 } else { 0 };
            if self.config.top_k == 0 || run < self.config.top_k {
                rows.push(self.to_row(p)?);
            }
        }
        Ok(rows)
    }

    /// Rows for the checkpoint file, plus the approximate rows when both indexes run.
    pub fn checkpoint_rows(&self) -> Result<(Vec<PmiRow>, Option<Vec<PmiRow>>)> {
        Ok(match (&self.exact, &self.approx) {
            (Some(_), Some(_)) => (self.exact_rows()?, Some(self.approx_rows()?)),
            (None, Some(_)) => (self.approx_rows()?, None),
            _ => (self.exact_rows()?, None),
        })
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            positives: self.positives,
            negatives: self.negatives,
            labels: self.labels.len(),
            features: self.features.len(),
            filtered_features: self.filtered_features,
            approx_heap_bytes: self.labels.approx_heap_bytes() + self.features.approx_heap_bytes(),
            ..Default::default()
        };
        if let Some(exact) = &self.exact {
            stats.nnz = exact.nnz();
            stats.negative_features = exact.negatives().len();
            stats.bloom_bits = exact.gate().num_bits();
            stats.bloom_fpp = exact.gate().estimated_fpp();
            stats.bloom_rebuilds = exact.gate().rebuilds();
            stats.approx_heap_bytes += exact.approx_heap_bytes();
        }
        if let Some(approx) = &self.approx {
            stats.approx_features = approx.num_features();
            stats.compactions = approx.compactions();
            stats.dropped_labels = approx.dropped_labels();
            stats.approx_heap_bytes += approx.approx_heap_bytes();
        }
        stats
    }
}
