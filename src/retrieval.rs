//! Two-stage retrieval: coarse vector search, then pairwise reranking.
//!
//! The coarse stage over-fetches `min(limit * overfetch_factor,
//! max_candidates)` nearest chunks (3x capped at 20 by default) so the
//! reranker has enough recall to work with. An empty coarse stage returns
//! immediately; the reranker never sees an empty batch.
//!
//! [`analyze_quality`] summarises a result list (similarity spread, grade,
//! category diversity) for the search endpoint. It reads the coarse
//! similarity because rerank scores are not comparable across models.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::ScoredCandidate;
use crate::rerank::Reranker;
use crate::store::VectorIndex;

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    reranker: Reranker,
    overfetch_factor: usize,
    max_candidates: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        reranker: Reranker,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            overfetch_factor: config.overfetch_factor,
            max_candidates: config.max_candidates,
        }
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Number of candidates the coarse stage asks the index for.
    pub fn coarse_k(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.overfetch_factor)
            .min(self.max_candidates)
    }

    /// Ranked candidates for `query`, best first, at most `limit` of them.
    ///
    /// Embedding and index failures propagate; reranker failures degrade to
    /// coarse order.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<ScoredCandidate>> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self
            .index
            .query(&vector, self.coarse_k(limit), category)
            .await?;

        if hits.is_empty() {
            tracing::debug!(category, "coarse stage returned no candidates");
            return Ok(Vec::new());
        }

        let candidates: Vec<ScoredCandidate> = hits
            .into_iter()
            .map(|hit| {
                let similarity = hit.similarity();
                ScoredCandidate {
                    chunk_id: hit.id,
                    title: hit.metadata.title,
                    category: hit.metadata.category,
                    content: hit.text,
                    coarse_similarity: similarity,
                    rerank_score: similarity,
                }
            })
            .collect();

        tracing::debug!(coarse = candidates.len(), limit, "reranking candidates");
        Ok(self.reranker.rerank(query, candidates, limit).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    NoResults,
}

impl SearchGrade {
    pub fn from_similarity(avg: f64) -> Self {
        if avg >= 0.8 {
            SearchGrade::Excellent
        } else if avg >= 0.6 {
            SearchGrade::Good
        } else if avg >= 0.4 {
            SearchGrade::Fair
        } else {
            SearchGrade::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    HighlyEffective,
    Effective,
    ModeratelyEffective,
    LowEffectiveness,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQuality {
    pub grade: SearchGrade,
    pub result_count: usize,
    pub average_similarity: f64,
    pub min_similarity: f64,
    pub max_similarity: f64,
    /// `distinct categories / result count`.
    pub category_diversity: f64,
    pub category_distribution: BTreeMap<String, usize>,
    pub effectiveness: Effectiveness,
    pub insights: Vec<String>,
}

pub fn analyze_quality(results: &[ScoredCandidate]) -> SearchQuality {
    if results.is_empty() {
        return SearchQuality {
            grade: SearchGrade::NoResults,
            result_count: 0,
            average_similarity: 0.0,
            min_similarity: 0.0,
            max_similarity: 0.0,
            category_diversity: 0.0,
            category_distribution: BTreeMap::new(),
            effectiveness: Effectiveness::LowEffectiveness,
            insights: vec![
                "No results found. Try broader terms or check that documents were loaded."
                    .to_string(),
            ],
        };
    }

    let sims: Vec<f64> = results.iter().map(|r| r.coarse_similarity).collect();
    let average = sims.iter().sum::<f64>() / sims.len() as f64;
    let min = sims.iter().copied().fold(f64::INFINITY, f64::min);
    let max = sims.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    for r in results {
        *distribution.entry(r.category.clone()).or_default() += 1;
    }
    let diversity = distribution.len() as f64 / results.len() as f64;
    let grade = SearchGrade::from_similarity(average);

    let mut insights = Vec::new();
    match grade {
        SearchGrade::Poor => insights.push(
            "Low result quality. Rephrase the query or check that relevant documents are indexed."
                .to_string(),
        ),
        SearchGrade::Excellent => insights
            .push("Excellent result quality: the query matched highly relevant documents.".to_string()),
        _ => {}
    }
    if diversity < 0.3 {
        insights.push(
            "Low category diversity: results are concentrated in a single kind of document."
                .to_string(),
        );
    }

    SearchQuality {
        grade,
        result_count: results.len(),
        average_similarity: average,
        min_similarity: min,
        max_similarity: max,
        category_diversity: diversity,
        category_distribution: distribution,
        effectiveness: effectiveness(grade, average, diversity),
        insights,
    }
}

fn effectiveness(grade: SearchGrade, average: f64, diversity: f64) -> Effectiveness {
    let mut score = match grade {
        SearchGrade::Excellent => 0.4,
        SearchGrade::Good => 0.3,
        SearchGrade::Fair => 0.2,
        _ => 0.0,
    };
    if average > 0.7 {
        score += 0.3;
    } else if average > 0.5 {
        score += 0.2;
    }
    if diversity > 0.5 {
        score += 0.3;
    } else if diversity > 0.3 {
        score += 0.2;
    }

    // Sums of tenths drift; compare with a little slack.
    const EPS: f64 = 1e-9;
    if score + EPS >= 0.8 {
        Effectiveness::HighlyEffective
    } else if score + EPS >= 0.6 {
        Effectiveness::Effective
    } else if score + EPS >= 0.4 {
        Effectiveness::ModeratelyEffective
    } else {
        Effectiveness::LowEffectiveness
    }
}
