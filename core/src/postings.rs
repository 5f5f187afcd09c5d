use crate::InstanceId;
use serde::{Deserialize, Serialize};

/// Above this length ratio the intersection binary-searches the longer list instead of
/// walking it.
const GALLOP_RATIO: usize = 32;

/// Ascending, duplicate-free instance ids for one label or one feature.
///
/// Ids are handed out in increasing order, so an append never needs a re-sort; the only
/// duplicate that can show up is the id just appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvertedList {
    ids: Vec<InstanceId>,
}

impl InvertedList {
    pub fn new() -> Self { Self::default() }

    /// Appends `id`; returns false when it repeats the last id.
    pub fn push(&mut self, id: InstanceId) -> bool {
        match self.ids.last() {
            Some(&last) if last == id => false,
            Some(&last) => {
                debug_assert!(last < id, "instance ids must be appended in increasing order");
                self.ids.push(id);
                true
            }
            None => {
                self.ids.push(id);
                true
            }
        }
    }

    pub fn len(&self) -> usize { self.ids.len() }
    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
    pub fn as_slice(&self) -> &[InstanceId] { &self.ids }
    pub fn iter(&self) -> impl Iterator<Item = InstanceId> + '_ { self.ids.iter().copied() }

    pub fn intersection_len(&self, other: &InvertedList) -> usize {
        intersect_count(&self.ids, &other.ids)
    }

    pub fn approx_heap_bytes(&self) -> usize {
        self.ids.capacity() * std::mem::size_of::<InstanceId>()
    }
}

/// Size of the intersection of two ascending, duplicate-free slices.
pub fn intersect_count(a: &[InstanceId], b: &[InstanceId]) -> usize {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if small.is_empty() {
        return 0;
    }
    if large.len() / small.len() >= GALLOP_RATIO {
        gallop_count(small, large)
    } else {
        merge_count(small, large)
    }
}

fn merge_count(a: &[InstanceId], b: &[InstanceId]) -> usize {
    let (mut i, mut j, mut n) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                n += 1;
                i += 1;
                j += 1;
            }
        }
    }
    n
}

fn gallop_count(small: &[InstanceId], large: &[InstanceId]) -> usize {
    let mut rest = large;
    let mut n = 0;
    for x in small {
        match rest.binary_search(x) {
            Ok(pos) => {
                n += 1;
                rest = &rest[pos + 1..];
            }
            Err(pos) => rest = &rest[pos..],
        }
        if rest.is_empty() {
            break;
        }
    }
    n
}
