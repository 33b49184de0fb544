use serde::Serialize;
use tracing::{info, warn};

use crate::db::CardStore;
use crate::error::IngestResult;
use crate::parser::CardCandidate;

/// Result of handing one chunk to the store.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResult {
    pub index: usize,
    pub size: usize,
    pub affected: usize,
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Totals over a list of chunk results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub chunks: Vec<ChunkResult>,
}

impl PublishReport {
    pub fn succeeded(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.chunks.len() - self.succeeded()
    }

    pub fn affected(&self) -> usize {
        self.chunks.iter().map(|c| c.affected).sum()
    }

    pub fn extend(&mut self, other: PublishReport) {
        self.chunks.extend(other.chunks);
    }
}

/// Sends records to the store in fixed-size chunks, in order.
///
/// There is no transaction across chunks: a failed chunk is recorded and the
/// next one is still attempted.
#[derive(Debug, Clone, Copy)]
pub struct BatchPublisher {
    batch_size: usize,
}

impl BatchPublisher {
    pub fn new(batch_size: usize) -> Self {
        BatchPublisher {
            batch_size: batch_size.max(1),
        }
    }

    pub fn insert<S: CardStore + ?Sized>(
        &self,
        store: &mut S,
        cards: &[CardCandidate],
    ) -> PublishReport {
        self.run("Inserted", cards, |chunk| store.insert_cards(chunk))
    }

    pub fn delete<S: CardStore + ?Sized>(&self, store: &mut S, ids: &[i64]) -> PublishReport {
        self.run("Deleted", ids, |chunk| store.delete_cards(chunk))
    }

    fn run<T, F>(&self, verb: &str, items: &[T], mut sink: F) -> PublishReport
    where
        F: FnMut(&[T]) -> IngestResult<usize>,
    {
        let total = items.len().div_ceil(self.batch_size);
        let chunks = items
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| match sink(chunk) {
                Ok(affected) => {
                    info!("{} batch {}/{}", verb, index + 1, total);
                    ChunkResult {
                        index,
                        size: chunk.len(),
                        affected,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Batch {}/{} failed: {}", index + 1, total, e);
                    ChunkResult {
                        index,
                        size: chunk.len(),
                        affected: 0,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();
        PublishReport { chunks }
    }
}
