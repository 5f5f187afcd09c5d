use anyhow::{bail, Context, Result};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One slice of the feature space. Every feature string belongs to exactly one of the
/// `count` shards, decided by a process-independent hash of the string, so separately
/// launched jobs agree on the partition without sharing an alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    index: u32,
    count: u32,
}

impl Shard {
    pub fn new(index: u32, count: u32) -> Result<Self> {
        if count == 0 {
            bail!("shard count must be positive");
        }
        if index >= count {
            bail!("shard index {index} out of range for {count} shards");
        }
        Ok(Self { index, count })
    }

    /// The single shard covering every feature.
    pub fn all() -> Self {
        Self { index: 0, count: 1 }
    }

    pub fn index(&self) -> u32 { self.index }
    pub fn count(&self) -> u32 { self.count }
    pub fn is_whole(&self) -> bool { self.count == 1 }

    pub fn feature_hash(feature: &str) -> u64 {
        let mut hasher = FxHasher::default();
        feature.hash(&mut hasher);
        // fold the high bits down, the modulus only sees the low ones
        let h = hasher.finish();
        h ^ (h >> 32)
    }

    pub fn matches_hash(&self, hash: u64) -> bool {
        hash % u64::from(self.count) == u64::from(self.index)
    }

    pub fn matches(&self, feature: &str) -> bool {
        self.is_whole() || self.matches_hash(Self::feature_hash(feature))
    }

    /// Prefix for output file names, empty for an unsharded run.
    pub fn file_prefix(&self) -> String {
        if self.is_whole() {
            String::new()
        } else {
            format!("shard{}of{}-", self.index, self.count)
        }
    }
}

impl Default for Shard {
    fn default() -> Self { Self::all() }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

impl FromStr for Shard {
    type Err = anyhow::Error;

    /// Parses `index/count`, e.g. `3/16`.
    fn from_str(s: &str) -> Result<Self> {
        let (i, n) = s.split_once('/').with_context(|| format!("shard must look like index/count, got {s:?}"))?;
        let index = i.trim().parse().with_context(|| format!("bad shard index in {s:?}"))?;
        let count = n.trim().parse().with_context(|| format!("bad shard count in {s:?}"))?;
        Shard::new(index, count)
    }
}
