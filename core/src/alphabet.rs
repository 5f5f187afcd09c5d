use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Integer identity handed out by an [`Alphabet`].
pub trait AlphabetId: Copy + Eq + Hash + Ord + fmt::Debug {
    fn from_index(index: u32) -> Self;
    fn index(self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u32);

impl AlphabetId for LabelId {
    fn from_index(index: u32) -> Self { LabelId(index) }
    fn index(self) -> u32 { self.0 }
}

impl AlphabetId for FeatureId {
    fn from_index(index: u32) -> Self { FeatureId(index) }
    fn index(self) -> u32 { self.0 }
}

/// Bidirectional string <-> id mapping. Ids are dense and assigned in first-seen order.
///
/// The id type parameter keeps label and feature alphabets apart: a `LabelId` can never be
/// looked up in a feature alphabet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Alphabet<I> {
    index: HashMap<String, u32>,
    objects: Vec<String>,
    _id: PhantomData<I>,
}

pub type LabelAlphabet = Alphabet<LabelId>;
pub type FeatureAlphabet = Alphabet<FeatureId>;

impl<I: AlphabetId> Default for Alphabet<I> {
    fn default() -> Self {
        Self { index: HashMap::new(), objects: Vec::new(), _id: PhantomData }
    }
}

impl<I: AlphabetId> Alphabet<I> {
    pub fn new() -> Self { Self::default() }

    /// Id of `name`, assigning the next id when absent and `create` is set.
    /// Returns `None` when absent and not created, or when the id space is exhausted.
    pub fn lookup_index(&mut self, name: &str, create: bool) -> Option<I> {
        if let Some(&i) = self.index.get(name) {
            return Some(I::from_index(i));
        }
        if !create {
            return None;
        }
        let i = u32::try_from(self.objects.len()).ok()?;
        self.index.insert(name.to_owned(), i);
        self.objects.push(name.to_owned());
        Some(I::from_index(i))
    }

    pub fn get(&self, name: &str) -> Option<I> {
        self.index.get(name).map(|&i| I::from_index(i))
    }

    pub fn lookup_object(&self, id: I) -> Option<&str> {
        self.objects.get(id.index() as usize).map(String::as_str)
    }

    /// Like [`lookup_object`](Self::lookup_object) but for ids this alphabet handed out.
    pub fn name(&self, id: I) -> &str {
        self.lookup_object(id).unwrap_or("")
    }

    pub fn len(&self) -> usize { self.objects.len() }

    pub fn is_empty(&self) -> bool { self.objects.is_empty() }

    /// All ids in assignment order.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        (0..self.objects.len() as u32).map(I::from_index)
    }

    /// Rough heap footprint, for progress reporting.
    pub fn approx_heap_bytes(&self) -> usize {
        let strings: usize = self.objects.iter().map(|s| s.capacity()).sum();
        // each name is held twice (map key and vector slot)
        strings * 2
            + self.objects.capacity() * std::mem::size_of::<String>()
            + self.index.capacity() * (std::mem::size_of::<String>() + std::mem::size_of::<u32>() + 8)
    }
}
