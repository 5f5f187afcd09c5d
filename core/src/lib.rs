//! Sparse PMI co-occurrence indexing and top-K feature selection.

pub mod alphabet;
pub mod approx;
pub mod bloom;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod exact;
pub mod instance;
pub mod persist;
pub mod postings;
pub mod rank;
pub mod shard;

/// Dense id of a positive instance, in arrival order.
pub type InstanceId = u32;

pub use alphabet::{Alphabet, AlphabetId, FeatureAlphabet, FeatureId, LabelAlphabet, LabelId};
pub use approx::ApproximateCooccurrenceIndex;
pub use bloom::BloomGate;
pub use checkpoint::{CheckpointKind, CheckpointScheduler};
pub use config::{IndexMode, SelectorConfig};
pub use engine::{IndexStats, PmiSelector};
pub use exact::ExactCooccurrenceIndex;
pub use instance::{Instance, InstanceClass};
pub use rank::{Pmi, PmiRow};
pub use shard::Shard;
