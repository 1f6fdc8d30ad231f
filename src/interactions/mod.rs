//! Interaction log.
//!
//! An [`Interaction`] is written once when a question is answered and then
//! touched by two independent writers: the evaluation engine sets
//! `quality_scores`, the feedback endpoint sets `user_feedback`. The store
//! exposes one method per field ([`set_quality_scores`], [`set_feedback`])
//! and both backends update only that field, so neither writer can undo
//! the other.
//!
//! A stored `quality_scores` value that fails to decode is logged and the
//! interaction is read back as unscored.
//!
//! [`set_quality_scores`]: InteractionStore::set_quality_scores
//! [`set_feedback`]: InteractionStore::set_feedback

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Lookup, Result};
use crate::models::{Interaction, QualityScores};

/// Totals used by the stats overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InteractionSummary {
    pub total: usize,
    pub scored: usize,
    pub with_feedback: usize,
    pub avg_response_time: Option<f64>,
    pub avg_rating: Option<f64>,
}

#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn insert(&self, interaction: &Interaction) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Lookup<Interaction>>;

    /// Interactions whose id is in `ids`, newest first. Unknown ids are ignored.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Interaction>>;

    /// The `limit` newest interactions.
    async fn recent(&self, limit: usize) -> Result<Vec<Interaction>>;

    /// The `limit` newest interactions that carry quality scores.
    async fn recent_scored(&self, limit: usize) -> Result<Vec<Interaction>>;

    /// Scored interactions with `timestamp >= since`, newest first.
    async fn scored_since(&self, since: DateTime<Utc>) -> Result<Vec<Interaction>>;

    /// A page of interactions, newest first.
    async fn list(&self, limit: usize, offset: usize, scored_only: bool)
        -> Result<Vec<Interaction>>;

    async fn count(&self, scored_only: bool) -> Result<usize>;

    async fn summary(&self) -> Result<InteractionSummary>;

    /// Overwrite `quality_scores` only. Returns `false` for an unknown id.
    async fn set_quality_scores(&self, id: &str, scores: &QualityScores) -> Result<bool>;

    /// Overwrite `user_feedback` only. Returns `false` for an unknown id.
    async fn set_feedback(&self, id: &str, rating: u8) -> Result<bool>;
}

/// Treat empty score objects as "not scored".
pub(crate) fn normalize_scores(scores: Option<QualityScores>) -> Option<QualityScores> {
    scores.filter(|s| !s.is_empty())
}

pub(crate) fn is_scored(interaction: &Interaction) -> bool {
    interaction
        .quality_scores
        .as_ref()
        .is_some_and(|s| !s.is_empty())
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}
