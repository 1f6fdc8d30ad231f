//! In-memory [`InteractionStore`] for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{is_scored, mean, normalize_scores, InteractionStore, InteractionSummary};
use crate::error::{Lookup, Result};
use crate::models::{Interaction, QualityScores};

#[derive(Default)]
pub struct InMemoryInteractions {
    records: RwLock<HashMap<String, Interaction>>,
}

impl InMemoryInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    async fn newest_first(&self, pred: impl Fn(&Interaction) -> bool) -> Vec<Interaction> {
        let records = self.records.read().await;
        let mut out: Vec<Interaction> = records.values().filter(|i| pred(i)).cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractions {
    async fn insert(&self, interaction: &Interaction) -> Result<()> {
        let mut stored = interaction.clone();
        stored.quality_scores = normalize_scores(stored.quality_scores);
        self.records
            .write()
            .await
            .insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Lookup<Interaction>> {
        Ok(self.records.read().await.get(id).cloned().into())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Interaction>> {
        Ok(self.newest_first(|i| ids.contains(&i.id)).await)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Interaction>> {
        let mut out = self.newest_first(|_| true).await;
        out.truncate(limit);
        Ok(out)
    }

    async fn recent_scored(&self, limit: usize) -> Result<Vec<Interaction>> {
        let mut out = self.newest_first(is_scored).await;
        out.truncate(limit);
        Ok(out)
    }

    async fn scored_since(&self, since: DateTime<Utc>) -> Result<Vec<Interaction>> {
        Ok(self
            .newest_first(|i| is_scored(i) && i.timestamp >= since)
            .await)
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        scored_only: bool,
    ) -> Result<Vec<Interaction>> {
        let all = self.newest_first(|i| !scored_only || is_scored(i)).await;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, scored_only: bool) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|i| !scored_only || is_scored(i))
            .count())
    }

    async fn summary(&self) -> Result<InteractionSummary> {
        let records = self.records.read().await;
        Ok(InteractionSummary {
            total: records.len(),
            scored: records.values().filter(|i| is_scored(i)).count(),
            with_feedback: records
                .values()
                .filter(|i| i.user_feedback.is_some())
                .count(),
            avg_response_time: mean(records.values().map(|i| i.response_time)),
            avg_rating: mean(records.values().filter_map(|i| i.user_feedback.map(f64::from))),
        })
    }

    async fn set_quality_scores(&self, id: &str, scores: &QualityScores) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.quality_scores = normalize_scores(Some(*scores));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_feedback(&self, id: &str, rating: u8) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.user_feedback = Some(rating);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
