//! Vector similarity index.
//!
//! The [`VectorIndex`] trait is the only thing retrieval and ingestion know
//! about storage. Two backends ship with the crate:
//!
//! - [`SqliteIndex`](sqlite::SqliteIndex): the `chunks` table, vectors as BLOBs
//! - [`InMemoryIndex`](memory::InMemoryIndex): for tests and dry runs
//!
//! Both compute cosine distance (`1 - cosine`) by brute force and both
//! treat an upsert of an existing id as last-writer-wins.
//!
//! A document is identified by its `(title, category)` pair.
//! [`VectorIndex::replace_document`] swaps out every chunk of one document
//! in a single unit, so an edited file never leaves its old chunks behind.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::{Lookup, Result};
use crate::models::{Chunk, ChunkMetadata};

/// One vector with the payload stored next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub text: String,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        IndexEntry {
            id: chunk.id.clone(),
            vector,
            metadata: ChunkMetadata::from(chunk),
            text: chunk.content.clone(),
        }
    }
}

/// A nearest-neighbour result.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    /// Cosine distance, `1 - cosine similarity`.
    pub distance: f64,
    pub metadata: ChunkMetadata,
    pub text: String,
}

impl IndexHit {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace `entries` as one unit: either all land or none do.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Drop every entry of the document `(title, category)` and write
    /// `entries` in its place, atomically. Returns how many entries were
    /// removed before the write.
    async fn replace_document(
        &self,
        title: &str,
        category: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Lookup<IndexEntry>>;

    /// Remove everything. Returns the number of entries removed.
    async fn clear(&self) -> Result<usize>;

    /// The `k` entries closest to `vector`, nearest first, optionally
    /// restricted to one category. Ties break on id.
    async fn query(&self, vector: &[f32], k: usize, category: Option<&str>)
        -> Result<Vec<IndexHit>>;

    async fn count(&self) -> Result<usize>;

    /// Every stored entry, ordered by id.
    async fn entries(&self) -> Result<Vec<IndexEntry>>;
}

/// Rank `candidates` by cosine distance to `vector` and keep the first `k`.
pub(crate) fn nearest<'a, I>(vector: &[f32], k: usize, candidates: I) -> Vec<IndexHit>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    let mut hits: Vec<IndexHit> = candidates
        .into_iter()
        .map(|entry| IndexHit {
            id: entry.id.clone(),
            distance: 1.0 - crate::embedding::cosine_similarity(vector, &entry.vector) as f64,
            metadata: entry.metadata.clone(),
            text: entry.text.clone(),
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
