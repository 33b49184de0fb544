use std::collections::HashSet;

use crate::parser::CardCandidate;

/// Identity of a card entry across documents and runs.
///
/// Parallels and variants of the same numbered card share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub brand: String,
    pub set_name: String,
    pub year: Option<i32>,
    pub card_number: String,
    pub player_name: String,
}

pub trait Keyed {
    fn dedup_key(&self) -> DedupKey;
}

impl Keyed for CardCandidate {
    fn dedup_key(&self) -> DedupKey {
        DedupKey {
            brand: self.brand.clone(),
            set_name: self.set_name.clone(),
            year: self.year,
            card_number: self.card_number.clone(),
            player_name: self.player_name.clone(),
        }
    }
}

/// A repeat, with its position in the input sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicate<T> {
    pub index: usize,
    pub item: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    pub unique: Vec<T>,
    pub duplicates: Vec<Duplicate<T>>,
}

/// Order-preserving first-wins filter. Keys seen in earlier calls stay seen.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from keys that are already persisted.
    pub fn with_existing(keys: impl IntoIterator<Item = DedupKey>) -> Self {
        Deduplicator {
            seen: keys.into_iter().collect(),
        }
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    pub fn partition<T: Keyed>(&mut self, items: impl IntoIterator<Item = T>) -> Partition<T> {
        let mut unique = Vec::new();
        let mut duplicates = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if self.seen.insert(item.dedup_key()) {
                unique.push(item);
            } else {
                duplicates.push(Duplicate { index, item });
            }
        }
        Partition { unique, duplicates }
    }
}
