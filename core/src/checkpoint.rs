use serde::{Deserialize, Serialize};
use std::fmt;

/// Which snapshot of a run a checkpoint file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Every positive instance, no negatives yet.
    PositivesOnly,
    /// After this many negatives.
    AfterNegatives(u64),
    Final,
}

impl CheckpointKind {
    pub fn file_stem(&self) -> String {
        match self {
            CheckpointKind::PositivesOnly => "after-pos".to_string(),
            CheckpointKind::AfterNegatives(n) => format!("after-neg{n}"),
            CheckpointKind::Final => "final".to_string(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, CheckpointKind::Final)
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

pub fn is_power_of_two(n: u64) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Decides when a long ingestion pass should write its results: once when the positives
/// are done, then whenever the negative count reaches a power of two at or above
/// `min_negatives`, then at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointScheduler {
    min_negatives: u64,
    positives: u64,
    negatives: u64,
    positives_snapshot_taken: bool,
}

impl CheckpointScheduler {
    pub fn new(min_negatives: u64) -> Self {
        Self { min_negatives, positives: 0, negatives: 0, positives_snapshot_taken: false }
    }

    pub fn positives(&self) -> u64 { self.positives }
    pub fn negatives(&self) -> u64 { self.negatives }

    /// Call before ingesting a negative. Returns the positives-only snapshot the first time,
    /// which must be written before that negative goes in.
    pub fn before_negative(&mut self) -> Option<CheckpointKind> {
        if self.positives_snapshot_taken {
            return None;
        }
        self.positives_snapshot_taken = true;
        (self.positives > 0).then_some(CheckpointKind::PositivesOnly)
    }

    pub fn record_positive(&mut self) {
        if self.positives_snapshot_taken {
            tracing::warn!(positives = self.positives, negatives = self.negatives, "positive instance after negatives started");
        }
        self.positives += 1;
    }

    /// Call after ingesting a negative.
    pub fn record_negative(&mut self) -> Option<CheckpointKind> {
        self.negatives += 1;
        (self.negatives >= self.min_negatives && is_power_of_two(self.negatives))
            .then_some(CheckpointKind::AfterNegatives(self.negatives))
    }

    /// Snapshots still owed at end of stream: the positives-only one if no negative ever
    /// arrived, then the final one.
    pub fn finish(&mut self) -> Vec<CheckpointKind> {
        let mut due = Vec::new();
        if !self.positives_snapshot_taken && self.positives > 0 {
            due.push(CheckpointKind::PositivesOnly);
        }
        self.positives_snapshot_taken = true;
        due.push(CheckpointKind::Final);
        due
    }
}
