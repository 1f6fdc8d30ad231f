//! Batch quality evaluation of recorded interactions.
//!
//! A run moves through `collect → score → aggregate → persist → trends`:
//!
//! - **collect**: explicit ids (validated) or the newest N interactions;
//!   an empty target set is [`PipelineError::NotFound`]
//! - **score**: the configured [`Evaluator`]; if it fails for the whole
//!   batch every metric is absent and the run carries on
//! - **aggregate**: per-metric means over valid values, grade, distribution
//! - **persist**: each interaction with at least one valid metric gets its
//!   `quality_scores` overwritten
//! - **trends**: compare against the scored interactions of the trailing
//!   window
//!
//! Recall@3 and perceived precision come from the stored interactions
//! alone and do not depend on the evaluator.

pub mod evaluator;
pub mod metrics;
pub mod scores;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::EvaluationConfig;
use crate::error::{Lookup, PipelineError, Result};
use crate::interactions::{mean, InteractionStore};
use crate::models::{Interaction, Metric, QualityScores};
use crate::validation;
use evaluator::{EvalRow, Evaluator};
use metrics::{QualityGrade, ScoreDistribution, SupplementaryMetric, TrendEntry};
use scores::{empty_scores, ScoreMap};

/// Characters of the question kept in per-interaction rows.
const QUESTION_PREVIEW_CHARS: usize = 100;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct InteractionScore {
    pub interaction_id: String,
    pub question: String,
    pub faithfulness: Option<f64>,
    pub answer_relevancy: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationMetadata {
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub evaluator: String,
    pub interaction_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoricalComparison {
    ComparisonAvailable {
        period_days: i64,
        interactions_count: usize,
        trends: BTreeMap<Metric, TrendEntry>,
    },
    NoHistoricalData {
        period_days: i64,
    },
}

impl HistoricalComparison {
    fn trends(&self) -> Option<&BTreeMap<Metric, TrendEntry>> {
        match self {
            HistoricalComparison::ComparisonAvailable { trends, .. } => Some(trends),
            HistoricalComparison::NoHistoricalData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub total_interactions: usize,
    /// Metrics with no valid score in the batch are absent.
    pub average_scores: BTreeMap<Metric, f64>,
    pub overall_score: Option<f64>,
    pub quality_grade: Option<QualityGrade>,
    pub score_distribution: ScoreDistribution,
    pub recall_at_3: SupplementaryMetric,
    pub perceived_precision: SupplementaryMetric,
    /// Interactions whose stored scores were overwritten.
    pub persisted: usize,
    pub individual_scores: Vec<InteractionScore>,
    pub historical_comparison: Option<HistoricalComparison>,
    pub recommendations: Vec<String>,
    pub metadata: EvaluationMetadata,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl MetricStats {
    fn of(values: &[f64]) -> Option<Self> {
        let avg = mean(values.iter().copied())?;
        Some(MetricStats {
            mean: avg,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: values.len(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub period_days: i64,
    pub total_interactions: usize,
    pub metrics: BTreeMap<Metric, MetricStats>,
    pub overall_average: Option<f64>,
    pub quality_grade: Option<QualityGrade>,
    pub perceived_precision: SupplementaryMetric,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsOverview {
    pub total_interactions: usize,
    pub scored_interactions: usize,
    pub interactions_with_feedback: usize,
    pub average_response_time: Option<f64>,
    pub average_user_rating: Option<f64>,
    pub evaluation_coverage_pct: f64,
    pub feedback_coverage_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionListItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer_preview: String,
    pub response_time: f64,
    pub user_feedback: Option<u8>,
    pub quality_scores: Option<QualityScores>,
    pub sources: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionPage {
    pub items: Vec<InteractionListItem>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

pub struct EvaluationEngine {
    store: Arc<dyn InteractionStore>,
    evaluator: Arc<dyn Evaluator>,
    config: EvaluationConfig,
}

impl EvaluationEngine {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        evaluator: Arc<dyn Evaluator>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            config,
        }
    }

    /// Evaluate `ids`, or the newest `limit` interactions when `ids` is
    /// `None` (default batch size when `limit` is `None` too).
    pub async fn evaluate(
        &self,
        ids: Option<Vec<String>>,
        limit: Option<usize>,
        include_trends: bool,
    ) -> Result<EvaluationReport> {
        let started = Instant::now();
        let timestamp = Utc::now();

        let interactions = self.collect(ids, limit).await?;
        let rows = interactions.len();
        tracing::info!(rows, evaluator = self.evaluator.name(), "evaluating interactions");

        let scores = self.score(&interactions).await;
        let average_scores = metrics::aggregate(&scores);
        let overall_score = metrics::overall_score(&average_scores);
        let score_distribution = metrics::distribution(&scores, rows);

        let individual_scores: Vec<InteractionScore> = interactions
            .iter()
            .enumerate()
            .map(|(i, interaction)| InteractionScore {
                interaction_id: interaction.id.clone(),
                question: truncate(&interaction.question, QUESTION_PREVIEW_CHARS),
                faithfulness: cell(&scores, Metric::Faithfulness, i),
                answer_relevancy: cell(&scores, Metric::AnswerRelevancy, i),
            })
            .collect();

        let persisted = self.persist(&individual_scores).await?;

        let historical_comparison = if include_trends {
            Some(self.compare_history(&average_scores).await?)
        } else {
            None
        };

        let no_trends = BTreeMap::new();
        let trends = historical_comparison
            .as_ref()
            .and_then(HistoricalComparison::trends)
            .unwrap_or(&no_trends);
        let recommendations =
            metrics::generate_recommendations(&average_scores, &score_distribution, trends);

        let report = EvaluationReport {
            total_interactions: rows,
            overall_score,
            quality_grade: overall_score.map(QualityGrade::from_score),
            average_scores,
            score_distribution,
            recall_at_3: metrics::aggregate_recall(
                &interactions,
                self.config.relevance_threshold,
                self.config.recall_context_fallback,
            ),
            perceived_precision: metrics::perceived_precision(&interactions),
            persisted,
            historical_comparison,
            recommendations,
            metadata: EvaluationMetadata {
                duration_seconds: started.elapsed().as_secs_f64(),
                timestamp,
                evaluator: self.evaluator.name().to_string(),
                interaction_ids: interactions.iter().map(|i| i.id.clone()).collect(),
            },
            individual_scores,
        };

        tracing::info!(
            rows,
            persisted,
            overall = ?report.overall_score,
            "evaluation finished"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        ids: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> Result<Vec<Interaction>> {
        let found = match ids {
            Some(ids) => {
                let ids =
                    validation::interaction_ids(&ids, self.config.max_ids, self.config.min_id_len)?;
                self.store.get_many(&ids).await?
            }
            None => {
                let limit = limit.unwrap_or(self.config.default_batch_size);
                if limit == 0 || limit > self.config.max_ids {
                    return Err(PipelineError::validation(
                        "limit",
                        format!("must be between 1 and {}", self.config.max_ids),
                    ));
                }
                self.store.recent(limit).await?
            }
        };
        Lookup::from_vec(found).or_not_found("no interactions found to evaluate")
    }

    async fn score(&self, interactions: &[Interaction]) -> ScoreMap {
        let rows: Vec<EvalRow> = interactions
            .iter()
            .map(|i| EvalRow {
                question: i.question.clone(),
                answer: i.answer.clone(),
                contexts: i.contexts.clone(),
            })
            .collect();

        match self.evaluator.evaluate(&rows).await {
            Ok(raw) => self.evaluator.extractor().extract(&raw, rows.len()),
            Err(e) => {
                tracing::warn!(error = %e, "evaluator failed; all metrics absent for this batch");
                empty_scores(rows.len())
            }
        }
    }

    async fn persist(&self, rows: &[InteractionScore]) -> Result<usize> {
        let mut written = 0;
        for row in rows {
            let scores = QualityScores {
                faithfulness: row.faithfulness,
                answer_relevancy: row.answer_relevancy,
            };
            if scores.is_empty() {
                continue;
            }
            if self
                .store
                .set_quality_scores(&row.interaction_id, &scores)
                .await?
            {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn compare_history(
        &self,
        current: &BTreeMap<Metric, f64>,
    ) -> Result<HistoricalComparison> {
        let days = self.config.trend_window_days;
        let history = self
            .store
            .scored_since(Utc::now() - Duration::days(days))
            .await?;
        if history.is_empty() {
            return Ok(HistoricalComparison::NoHistoricalData { period_days: days });
        }
        let historical = metrics::historical_averages(&history);
        Ok(HistoricalComparison::ComparisonAvailable {
            period_days: days,
            interactions_count: history.len(),
            trends: metrics::compare_trends(current, &historical, self.config.trend_epsilon),
        })
    }

    /// Score statistics over interactions evaluated in the last `days`,
    /// defaulting to the trend window.
    pub async fn quality_report(&self, days: Option<i64>) -> Result<QualityReport> {
        let days = days.unwrap_or(self.config.trend_window_days);
        if days < 1 {
            return Err(PipelineError::validation("days", "must be at least 1"));
        }
        let scored = Lookup::from_vec(
            self.store
                .scored_since(Utc::now() - Duration::days(days))
                .await?,
        )
        .or_not_found(format!("no evaluated interactions in the last {} days", days))?;

        let stats: BTreeMap<Metric, MetricStats> = Metric::ALL
            .into_iter()
            .filter_map(|metric| {
                let values: Vec<f64> = scored
                    .iter()
                    .filter_map(|i| i.quality_scores.as_ref().and_then(|s| s.get(metric)))
                    .collect();
                MetricStats::of(&values).map(|s| (metric, s))
            })
            .collect();
        let overall_average = mean(stats.values().map(|s| s.mean));

        Ok(QualityReport {
            period_days: days,
            total_interactions: scored.len(),
            metrics: stats,
            overall_average,
            quality_grade: overall_average.map(QualityGrade::from_score),
            perceived_precision: metrics::perceived_precision(&scored),
        })
    }

    pub async fn stats_overview(&self) -> Result<StatsOverview> {
        let summary = self.store.summary().await?;
        let pct = |part: usize| {
            if summary.total == 0 {
                0.0
            } else {
                part as f64 * 100.0 / summary.total as f64
            }
        };
        Ok(StatsOverview {
            total_interactions: summary.total,
            scored_interactions: summary.scored,
            interactions_with_feedback: summary.with_feedback,
            average_response_time: summary.avg_response_time,
            average_user_rating: summary.avg_rating,
            evaluation_coverage_pct: pct(summary.scored),
            feedback_coverage_pct: pct(summary.with_feedback),
        })
    }

    pub async fn list_interactions(
        &self,
        limit: usize,
        offset: usize,
        scored_only: bool,
    ) -> Result<InteractionPage> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(PipelineError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }
        let total = self.store.count(scored_only).await?;
        let items = self
            .store
            .list(limit, offset, scored_only)
            .await?
            .into_iter()
            .map(|i| InteractionListItem {
                answer_preview: truncate(&i.answer, 200),
                question: i.question,
                id: i.id,
                timestamp: i.timestamp,
                response_time: i.response_time,
                user_feedback: i.user_feedback,
                quality_scores: i.quality_scores,
                sources: i.sources.len(),
            })
            .collect::<Vec<_>>();
        Ok(InteractionPage {
            has_more: offset + items.len() < total,
            items,
            total,
            limit,
            offset,
        })
    }
}

fn cell(scores: &ScoreMap, metric: Metric, row: usize) -> Option<f64> {
    scores.get(&metric).and_then(|c| c.get(row).copied().flatten())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}
