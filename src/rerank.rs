//! Second-stage reranking.
//!
//! A [`PairwiseScorer`] rates `(query, passage)` pairs, typically with a
//! cross-encoder. The [`Reranker`] applies those scores to coarse
//! candidates, stable-sorts them descending and truncates, so equal scores
//! keep their coarse-stage order.
//!
//! Without a scorer, or when the scorer fails, candidates keep their coarse
//! similarity as the rerank score and the coarse order survives.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RerankConfig;
use crate::error::Result;
use crate::models::ScoredCandidate;

/// Scores how well each passage answers `query`. Higher is better; no
/// normalisation across calls is implied.
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    fn model_name(&self) -> &str;

    /// One score per passage, in input order.
    async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f64>>;
}

#[derive(Clone, Default)]
pub struct Reranker {
    scorer: Option<Arc<dyn PairwiseScorer>>,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn PairwiseScorer>>) -> Self {
        Self { scorer }
    }

    pub fn is_active(&self) -> bool {
        self.scorer.is_some()
    }

    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
        limit: usize,
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return candidates;
        }

        if let Some(scorer) = &self.scorer {
            let passages: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
            match scorer.score_pairs(query, &passages).await {
                Ok(scores) if scores.len() == candidates.len() => {
                    let unscored = scores.iter().filter(|s| s.is_nan()).count();
                    if unscored > 0 {
                        tracing::warn!(unscored, "reranker returned NaN scores; ranking them last");
                    }
                    for (candidate, score) in candidates.iter_mut().zip(scores) {
                        // NaN sorts above +inf under total_cmp.
                        candidate.rerank_score = if score.is_nan() {
                            f64::NEG_INFINITY
                        } else {
                            score
                        };
                    }
                }
                Ok(scores) => {
                    tracing::warn!(
                        expected = candidates.len(),
                        got = scores.len(),
                        "reranker returned wrong number of scores; keeping coarse order"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reranker failed; keeping coarse order");
                }
            }
        }

        // `sort_by` is stable: ties keep coarse order.
        candidates.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
        candidates.truncate(limit);
        candidates
    }
}

// ============ Local cross-encoder (fastembed) ============

#[cfg(feature = "local-models")]
pub struct CrossEncoderScorer {
    model_name: String,
    model: Arc<std::sync::Mutex<Option<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-models")]
impl CrossEncoderScorer {
    pub fn new(config: &RerankConfig) -> anyhow::Result<Self> {
        config_to_rerank_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-models")]
fn config_to_rerank_model(name: &str) -> anyhow::Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
        "jina-reranker-v2-base-multilingual" => {
            Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
        }
        other => anyhow::bail!(
            "Unknown rerank model: '{}'. Supported models: bge-reranker-base, \
             bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            other
        ),
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl PairwiseScorer for CrossEncoderScorer {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f64>> {
        use crate::error::PipelineError;

        let model_name = self.model_name.clone();
        let cache = Arc::clone(&self.model);
        let query = query.to_string();
        let passages = passages.to_vec();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f64>> {
            let mut guard = cache
                .lock()
                .map_err(|_| anyhow::anyhow!("rerank model lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(config_to_rerank_model(&model_name)?)
                        .with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize rerank model: {}", e))?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("rerank model not loaded"))?;

            let documents: Vec<&str> = passages.iter().map(String::as_str).collect();
            let results = model
                .rerank(query.as_str(), documents, false, None)
                .map_err(|e| anyhow::anyhow!("Rerank failed: {}", e))?;

            // Results come back sorted by score; put them back in input order.
            let mut scores = vec![f64::NEG_INFINITY; passages.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score as f64;
                }
            }
            Ok(scores)
        })
        .await
        .map_err(|e| PipelineError::dependency("reranker", e))?
        .map_err(|e| PipelineError::dependency("reranker", format!("{:#}", e)))
    }
}

/// Build the configured reranker. `"disabled"` yields a pass-through.
pub fn create_reranker(config: &RerankConfig) -> anyhow::Result<Reranker> {
    match config.provider.as_str() {
        "disabled" => Ok(Reranker::new(None)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Reranker::new(Some(Arc::new(CrossEncoderScorer::new(config)?)))),
        #[cfg(not(feature = "local-models"))]
        "local" => anyhow::bail!("Local reranker requires --features local-models"),
        other => anyhow::bail!("Unknown rerank provider: {}", other),
    }
}
