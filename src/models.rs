//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, retrieval candidates and
//! recorded interactions that flow from ingestion through answering to
//! evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file as read from disk, before sentence filtering.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub title: String,
    pub category: String,
    pub body_text: String,
    pub source_metadata: BTreeMap<String, String>,
}

/// Why the filter rejected a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AboveThreshold,
    ForcedNoise,
}

/// Why the filter neither accepted nor rejected a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooShort,
    ScorerFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected { reason: RejectReason },
    Skipped { reason: SkipReason },
}

/// One entry of a [`QualityTrace`].
#[derive(Debug, Clone, Serialize)]
pub struct SentenceVerdict {
    pub sentence: String,
    /// Anomaly score, absent when the sentence was never scored.
    pub score: Option<f64>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Per-sentence decision log produced while cleaning a document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityTrace {
    pub verdicts: Vec<SentenceVerdict>,
}

impl QualityTrace {
    pub fn accepted(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Accepted))
    }

    pub fn rejected(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Rejected { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.verdicts.iter().filter(|v| pred(&v.verdict)).count()
    }
}

/// A document whose body holds only the sentences that passed the filter.
#[derive(Debug, Clone)]
pub struct CleanDocument {
    pub title: String,
    pub category: String,
    pub body_text: String,
    pub source_metadata: BTreeMap<String, String>,
    pub quality_trace: QualityTrace,
}

/// A bounded slice of a cleaned document; the unit that gets indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{category}_{content hash}`, stable across re-ingestion.
    pub id: String,
    pub parent_title: String,
    pub category: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub source_metadata: BTreeMap<String, String>,
}

/// Per-chunk metadata stored alongside the vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub category: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub source: BTreeMap<String, String>,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(chunk: &Chunk) -> Self {
        ChunkMetadata {
            title: chunk.parent_title.clone(),
            category: chunk.category.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            source: chunk.source_metadata.clone(),
        }
    }
}

/// A retrieval candidate. Lives for one request only.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub chunk_id: String,
    pub title: String,
    pub category: String,
    pub content: String,
    /// `1 - distance` from the vector index.
    pub coarse_similarity: f64,
    /// Pairwise relevance score; drives the final ordering.
    pub rerank_score: f64,
}

/// Citation entry persisted with an interaction, aligned with `[Document N]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub index: usize,
    pub title: String,
    pub category: String,
    pub similarity: f64,
}

/// The evaluated metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Faithfulness,
    AnswerRelevancy,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Faithfulness, Metric::AnswerRelevancy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Faithfulness => "faithfulness",
            Metric::AnswerRelevancy => "answer_relevancy",
        }
    }

    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluator output persisted onto an interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub faithfulness: Option<f64>,
    pub answer_relevancy: Option<f64>,
}

impl QualityScores {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Faithfulness => self.faithfulness,
            Metric::AnswerRelevancy => self.answer_relevancy,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        match metric {
            Metric::Faithfulness => self.faithfulness = value,
            Metric::AnswerRelevancy => self.answer_relevancy = value,
        }
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_none())
    }

    /// Mean of the metrics that are present.
    pub fn mean(&self) -> Option<f64> {
        let present: Vec<f64> = Metric::ALL.iter().filter_map(|m| self.get(*m)).collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
}

/// A recorded question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub contexts: Vec<String>,
    pub sources: Vec<SourceRef>,
    /// Seconds from request to answer.
    pub response_time: f64,
    pub user_feedback: Option<u8>,
    pub quality_scores: Option<QualityScores>,
    pub model_version: String,
    pub embedding_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_scores_mean_skips_missing() {
        let scores = QualityScores {
            faithfulness: Some(0.9),
            answer_relevancy: None,
        };
        assert_eq!(scores.mean(), Some(0.9));
        assert!(QualityScores::default().mean().is_none());
        assert!(QualityScores::default().is_empty());
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::from_name("answer_relevancy"), Some(Metric::AnswerRelevancy));
        assert_eq!(Metric::from_name("context_recall"), None);
    }

    #[test]
    fn test_trace_counts() {
        let trace = QualityTrace {
            verdicts: vec![
                SentenceVerdict {
                    sentence: "a b c".into(),
                    score: Some(10.0),
                    verdict: Verdict::Accepted,
                },
                SentenceVerdict {
                    sentence: "x y z".into(),
                    score: Some(900.0),
                    verdict: Verdict::Rejected {
                        reason: RejectReason::AboveThreshold,
                    },
                },
                SentenceVerdict {
                    sentence: "hi".into(),
                    score: None,
                    verdict: Verdict::Skipped {
                        reason: SkipReason::TooShort,
                    },
                },
            ],
        };
        assert_eq!(trace.accepted(), 1);
        assert_eq!(trace.rejected(), 1);
        assert_eq!(trace.skipped(), 1);
    }
}
