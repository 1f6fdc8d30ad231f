//! Aggregate quality metrics. Everything here is a pure function of its
//! inputs.

use serde::Serialize;
use std::collections::BTreeMap;

use super::scores::ScoreMap;
use crate::interactions::mean;
use crate::models::{Interaction, Metric};

/// Number of leading sources that count toward Recall@3.
const RECALL_TOP_K: usize = 3;
/// Share of poor interactions above which a system review is recommended.
const POOR_FRACTION_LIMIT: f64 = 0.3;
const FAITHFULNESS_FLOOR: f64 = 0.7;
const RELEVANCY_FLOOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityGrade::Excellent
        } else if score >= 0.7 {
            QualityGrade::Good
        } else if score >= 0.6 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

impl ScoreDistribution {
    pub fn total(&self) -> usize {
        self.excellent + self.good + self.fair + self.poor
    }

    pub fn poor_fraction(&self) -> f64 {
        self.poor as f64 / self.total().max(1) as f64
    }

    fn record(&mut self, score: f64) {
        match QualityGrade::from_score(score) {
            QualityGrade::Excellent => self.excellent += 1,
            QualityGrade::Good => self.good += 1,
            QualityGrade::Fair => self.fair += 1,
            QualityGrade::Poor => self.poor += 1,
        }
    }
}

/// Mean of each metric over its valid entries. Metrics with no valid entry
/// are left out rather than reported as zero.
pub fn aggregate(scores: &ScoreMap) -> BTreeMap<Metric, f64> {
    scores
        .iter()
        .filter_map(|(metric, column)| {
            mean(column.iter().flatten().copied()).map(|avg| (*metric, avg))
        })
        .collect()
}

/// Mean of the metric means.
pub fn overall_score(averages: &BTreeMap<Metric, f64>) -> Option<f64> {
    mean(averages.values().copied())
}

/// Bucket each row by the mean of its available metrics. Rows with no
/// metric at all are not counted.
pub fn distribution(scores: &ScoreMap, rows: usize) -> ScoreDistribution {
    let mut dist = ScoreDistribution::default();
    for row in 0..rows {
        let values = scores
            .values()
            .filter_map(|column| column.get(row).copied().flatten());
        if let Some(avg) = mean(values) {
            dist.record(avg);
        }
    }
    dist
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

pub fn classify_trend(current: f64, historical: f64, epsilon: f64) -> Trend {
    let diff = current - historical;
    if diff > epsilon {
        Trend::Improving
    } else if diff < -epsilon {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendEntry {
    pub trend: Trend,
    pub difference: f64,
    pub current: f64,
    pub historical: f64,
}

/// Trends for the metrics present on both sides.
pub fn compare_trends(
    current: &BTreeMap<Metric, f64>,
    historical: &BTreeMap<Metric, f64>,
    epsilon: f64,
) -> BTreeMap<Metric, TrendEntry> {
    historical
        .iter()
        .filter_map(|(metric, &hist)| {
            current.get(metric).map(|&cur| {
                (
                    *metric,
                    TrendEntry {
                        trend: classify_trend(cur, hist, epsilon),
                        difference: cur - hist,
                        current: cur,
                        historical: hist,
                    },
                )
            })
        })
        .collect()
}

/// Per-metric means over the persisted scores of `interactions`.
pub fn historical_averages(interactions: &[Interaction]) -> BTreeMap<Metric, f64> {
    Metric::ALL
        .into_iter()
        .filter_map(|metric| {
            let values = interactions
                .iter()
                .filter_map(|i| i.quality_scores.as_ref().and_then(|s| s.get(metric)));
            mean(values).map(|avg| (metric, avg))
        })
        .collect()
}

/// Recall@3 for one interaction.
///
/// With sources: `relevant in the first three / all relevant`, where a
/// source is relevant when its similarity exceeds `relevance_threshold`;
/// `None` if nothing is relevant. Without sources: the context-count proxy
/// `min(1, contexts / 3)` when `context_fallback` is on, else `None`.
pub fn recall_at_3(
    interaction: &Interaction,
    relevance_threshold: f64,
    context_fallback: bool,
) -> Option<f64> {
    if interaction.sources.is_empty() {
        return context_fallback
            .then(|| (interaction.contexts.len() as f64 / RECALL_TOP_K as f64).min(1.0));
    }

    let mut ranked: Vec<_> = interaction.sources.iter().collect();
    ranked.sort_by_key(|s| s.index);

    let relevant: Vec<bool> = ranked
        .iter()
        .map(|s| s.similarity > relevance_threshold)
        .collect();
    let total = relevant.iter().filter(|r| **r).count();
    if total == 0 {
        return None;
    }
    let in_top = relevant.iter().take(RECALL_TOP_K).filter(|r| **r).count();
    Some(in_top as f64 / total as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SupplementaryMetric {
    /// `None` when no interaction contributed a data point.
    pub value: Option<f64>,
    pub count: usize,
}

pub fn aggregate_recall(
    interactions: &[Interaction],
    relevance_threshold: f64,
    context_fallback: bool,
) -> SupplementaryMetric {
    let points: Vec<f64> = interactions
        .iter()
        .filter_map(|i| recall_at_3(i, relevance_threshold, context_fallback))
        .collect();
    SupplementaryMetric {
        value: mean(points.iter().copied()),
        count: points.len(),
    }
}

/// Mean of `(rating - 1) / 4` over rated interactions.
pub fn perceived_precision(interactions: &[Interaction]) -> SupplementaryMetric {
    let points: Vec<f64> = interactions
        .iter()
        .filter_map(|i| i.user_feedback)
        .filter(|r| (1..=5).contains(r))
        .map(|r| (r as f64 - 1.0) / 4.0)
        .collect();
    SupplementaryMetric {
        value: mean(points.iter().copied()),
        count: points.len(),
    }
}

pub const HEALTHY_MESSAGE: &str =
    "Quality is healthy: the system is operating within expected standards.";

/// Actionable advice for an evaluation run. Never empty.
pub fn generate_recommendations(
    averages: &BTreeMap<Metric, f64>,
    distribution: &ScoreDistribution,
    trends: &BTreeMap<Metric, TrendEntry>,
) -> Vec<String> {
    let mut out = Vec::new();

    if averages
        .get(&Metric::Faithfulness)
        .is_some_and(|v| *v < FAITHFULNESS_FLOOR)
    {
        out.push(
            "Low faithfulness: review the quality of the source documents; \
             consider cleaning the data and improving chunking."
                .to_string(),
        );
    }
    if averages
        .get(&Metric::AnswerRelevancy)
        .is_some_and(|v| *v < RELEVANCY_FLOOR)
    {
        out.push(
            "Low answer relevancy: adjust the LLM prompt so answers address the question directly."
                .to_string(),
        );
    }
    if distribution.poor_fraction() > POOR_FRACTION_LIMIT {
        out.push(format!(
            "{:.0}% of interactions scored poor: a general system review is needed.",
            distribution.poor_fraction() * 100.0
        ));
    }

    let declining: Vec<&str> = trends
        .iter()
        .filter(|(_, entry)| entry.trend == Trend::Declining)
        .map(|(metric, _)| metric.as_str())
        .collect();
    if !declining.is_empty() {
        out.push(format!(
            "Declining metrics: {}. Investigate recent system changes.",
            declining.join(", ")
        ));
    }

    if out.is_empty() {
        out.push(HEALTHY_MESSAGE.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QualityScores, SourceRef};
    use chrono::Utc;

    fn interaction(sources: &[f64], contexts: usize, feedback: Option<u8>) -> Interaction {
        Interaction {
            id: "interaction-0001".into(),
            timestamp: Utc::now(),
            question: "q".into(),
            answer: "a".into(),
            contexts: vec!["c".to_string(); contexts],
            sources: sources
                .iter()
                .enumerate()
                .map(|(i, s)| SourceRef {
                    index: i + 1,
                    title: "t".into(),
                    category: "c".into(),
                    similarity: *s,
                })
                .collect(),
            response_time: 0.1,
            user_feedback: feedback,
            quality_scores: None,
            model_version: "m".into(),
            embedding_model: "e".into(),
        }
    }

    #[test]
    fn test_aggregate_excludes_missing() {
        let mut scores = ScoreMap::new();
        scores.insert(Metric::Faithfulness, vec![Some(0.9), None, Some(0.7)]);
        scores.insert(Metric::AnswerRelevancy, vec![None, None, None]);
        let avg = aggregate(&scores);
        assert!((avg[&Metric::Faithfulness] - 0.8).abs() < 1e-9);
        assert!(!avg.contains_key(&Metric::AnswerRelevancy));
    }

    #[test]
    fn test_grade_bands() {
        assert_eq!(QualityGrade::from_score(0.8), QualityGrade::Excellent);
        assert_eq!(QualityGrade::from_score(0.7), QualityGrade::Good);
        assert_eq!(QualityGrade::from_score(0.65), QualityGrade::Fair);
        assert_eq!(QualityGrade::from_score(0.59), QualityGrade::Poor);
    }

    #[test]
    fn test_distribution_uses_row_means() {
        let mut scores = ScoreMap::new();
        scores.insert(Metric::Faithfulness, vec![Some(1.0), Some(0.5), None]);
        scores.insert(Metric::AnswerRelevancy, vec![Some(0.8), None, None]);
        let dist = distribution(&scores, 3);
        assert_eq!(dist.excellent, 1);
        assert_eq!(dist.poor, 1);
        assert_eq!(dist.total(), 2);
    }

    #[test]
    fn test_trend_dead_band() {
        assert_eq!(classify_trend(0.80, 0.70, 0.05), Trend::Improving);
        assert_eq!(classify_trend(0.70, 0.80, 0.05), Trend::Declining);
        assert_eq!(classify_trend(0.72, 0.70, 0.05), Trend::Stable);
    }

    #[test]
    fn test_recall_with_sources() {
        // relevant: 1st, 2nd and 4th; two of three in the top 3
        let i = interaction(&[0.9, 0.5, 0.1, 0.8], 4, None);
        let r = recall_at_3(&i, 0.3, true).unwrap();
        assert!((r - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recall_no_relevant_sources_is_absent() {
        let i = interaction(&[0.1, 0.2], 2, None);
        assert_eq!(recall_at_3(&i, 0.3, true), None);
    }

    #[test]
    fn test_recall_context_proxy() {
        let i = interaction(&[], 2, None);
        assert!((recall_at_3(&i, 0.3, true).unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(recall_at_3(&interaction(&[], 5, None), 0.3, true), Some(1.0));
        assert_eq!(recall_at_3(&i, 0.3, false), None);
    }

    #[test]
    fn test_perceived_precision() {
        let rated = vec![interaction(&[], 0, Some(5)), interaction(&[], 0, None)];
        let p = perceived_precision(&rated);
        assert_eq!(p.value, Some(1.0));
        assert_eq!(p.count, 1);
        assert_eq!(perceived_precision(&[interaction(&[], 0, None)]).value, None);
    }

    #[test]
    fn test_historical_averages_skip_unscored() {
        let mut a = interaction(&[], 0, None);
        a.quality_scores = Some(QualityScores {
            faithfulness: Some(0.6),
            answer_relevancy: None,
        });
        let b = interaction(&[], 0, None);
        let avg = historical_averages(&[a, b]);
        assert_eq!(avg.get(&Metric::Faithfulness), Some(&0.6));
        assert!(avg.get(&Metric::AnswerRelevancy).is_none());
    }

    #[test]
    fn test_recommendations_are_never_empty() {
        let empty = generate_recommendations(
            &BTreeMap::new(),
            &ScoreDistribution::default(),
            &BTreeMap::new(),
        );
        assert_eq!(empty, vec![HEALTHY_MESSAGE.to_string()]);

        let perfect: BTreeMap<_, _> = Metric::ALL.into_iter().map(|m| (m, 1.0)).collect();
        let dist = ScoreDistribution {
            excellent: 10,
            ..Default::default()
        };
        assert_eq!(
            generate_recommendations(&perfect, &dist, &BTreeMap::new()).len(),
            1
        );
    }

    #[test]
    fn test_recommendations_fire_on_thresholds() {
        let mut averages = BTreeMap::new();
        averages.insert(Metric::Faithfulness, 0.5);
        averages.insert(Metric::AnswerRelevancy, 0.9);
        let dist = ScoreDistribution {
            poor: 2,
            good: 2,
            ..Default::default()
        };
        let mut hist = BTreeMap::new();
        hist.insert(Metric::Faithfulness, 0.8);
        let trends = compare_trends(&averages, &hist, 0.05);

        let recs = generate_recommendations(&averages, &dist, &trends);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].starts_with("Low faithfulness"));
        assert!(recs[1].contains("50%"));
        assert!(recs[2].contains("Declining metrics: faithfulness"));
    }
}
