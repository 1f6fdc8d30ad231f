//! In-memory [`VectorIndex`] for tests and dry runs.
//!
//! Entries live in a `BTreeMap` behind a tokio `RwLock`: any number of
//! concurrent queries, one writer at a time, whole-batch upserts.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{nearest, IndexEntry, IndexHit, VectorIndex};
use crate::error::{Lookup, Result};

#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut map = self.entries.write().await;
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    async fn replace_document(
        &self,
        title: &str,
        category: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<usize> {
        let mut map = self.entries.write().await;
        let before = map.len();
        map.retain(|_, e| !(e.metadata.title == title && e.metadata.category == category));
        let removed = before - map.len();
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Lookup<IndexEntry>> {
        Ok(self.entries.read().await.get(id).cloned().into())
    }

    async fn clear(&self) -> Result<usize> {
        let mut map = self.entries.write().await;
        let removed = map.len();
        map.clear();
        Ok(removed)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let map = self.entries.read().await;
        let candidates = map
            .values()
            .filter(|e| category.map_or(true, |c| e.metadata.category == c));
        Ok(nearest(vector, k, candidates))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}
