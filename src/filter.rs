//! Sentence-level noise filter.
//!
//! Splits a document into sentences, scores each one with an
//! [`AnomalyScorer`] (conceptually a language-model perplexity: how
//! surprising the sentence is), and keeps only the sentences that pass.
//!
//! # Decision rule
//!
//! Evaluated per sentence, in this order:
//!
//! 1. fewer than `min_tokens` whitespace tokens → skipped (not in output)
//! 2. score above `threshold` and not listed in `exceptions` → rejected
//! 3. listed in `forced_noise` → rejected, whatever the score
//! 4. otherwise → accepted
//!
//! The two literal lists correct known scorer mistakes and always win over
//! the numeric threshold. A sentence longer than the scorer's context
//! window scores `+∞` without a call to the scorer.
//!
//! With no scorer configured the filter is the identity function, so a
//! missing model degrades ingestion instead of breaking it.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FilterConfig;
use crate::error::{PipelineError, Result};
use crate::models::{QualityTrace, RejectReason, SentenceVerdict, SkipReason, Verdict};

/// Rough characters-per-token ratio used to check the context window.
const CHARS_PER_TOKEN: usize = 4;

/// Scores how anomalous a sentence is. Higher means more surprising.
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    /// Longest input, in tokens, the scorer accepts.
    fn context_window(&self) -> usize;

    /// Token estimate used against [`context_window`](Self::context_window).
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    async fn score(&self, sentence: &str) -> Result<f64>;
}

pub struct SentenceQualityFilter {
    scorer: Option<Arc<dyn AnomalyScorer>>,
    threshold: f64,
    min_tokens: usize,
    exceptions: HashSet<String>,
    forced_noise: HashSet<String>,
}

impl SentenceQualityFilter {
    pub fn new(scorer: Option<Arc<dyn AnomalyScorer>>, config: &FilterConfig) -> Self {
        Self {
            scorer,
            threshold: config.threshold,
            min_tokens: config.min_tokens,
            exceptions: config.exceptions.iter().map(|s| s.trim().to_string()).collect(),
            forced_noise: config
                .forced_noise
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    /// A filter without a scorer: `clean` returns its input unchanged.
    pub fn passthrough() -> Self {
        Self::new(None, &FilterConfig::default())
    }

    pub fn is_active(&self) -> bool {
        self.scorer.is_some()
    }

    pub async fn clean(&self, text: &str) -> String {
        self.clean_with_trace(text).await.0
    }

    /// Clean `text` and return the per-sentence verdicts alongside it.
    pub async fn clean_with_trace(&self, text: &str) -> (String, QualityTrace) {
        let Some(scorer) = &self.scorer else {
            return (text.to_string(), QualityTrace::default());
        };

        let mut trace = QualityTrace::default();
        let mut kept: Vec<String> = Vec::new();

        for sentence in segment_sentences(text) {
            if sentence.split_whitespace().count() < self.min_tokens {
                trace.verdicts.push(SentenceVerdict {
                    sentence,
                    score: None,
                    verdict: Verdict::Skipped {
                        reason: SkipReason::TooShort,
                    },
                });
                continue;
            }

            let score = if scorer.count_tokens(&sentence) > scorer.context_window() {
                f64::INFINITY
            } else {
                match scorer.score(&sentence).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "anomaly scorer failed; skipping sentence");
                        trace.verdicts.push(SentenceVerdict {
                            sentence,
                            score: None,
                            verdict: Verdict::Skipped {
                                reason: SkipReason::ScorerFailed,
                            },
                        });
                        continue;
                    }
                }
            };

            let verdict = self.decide(&sentence, score);
            tracing::debug!(score, ?verdict, sentence = %sentence, "sentence verdict");
            if verdict == Verdict::Accepted {
                kept.push(sentence.clone());
            }
            trace.verdicts.push(SentenceVerdict {
                sentence,
                score: Some(score),
                verdict,
            });
        }

        (kept.join(" "), trace)
    }

    /// Apply the override lists and threshold to an already-scored sentence.
    pub fn decide(&self, sentence: &str, score: f64) -> Verdict {
        let sentence = sentence.trim();
        if score > self.threshold && !self.exceptions.contains(sentence) {
            Verdict::Rejected {
                reason: RejectReason::AboveThreshold,
            }
        } else if self.forced_noise.contains(sentence) {
            Verdict::Rejected {
                reason: RejectReason::ForcedNoise,
            }
        } else {
            Verdict::Accepted
        }
    }
}

/// Rule-based sentence segmentation.
///
/// A sentence ends at a line break, or at `.`, `!`, `?` or `…` followed
/// by whitespace or end of input. Sentences are trimmed; blanks dropped.
pub fn segment_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    let mut flush = |current: &mut String| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if c == '\n' {
            flush(&mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '…') {
            match chars.peek() {
                None => flush(&mut current),
                Some(next) if next.is_whitespace() => flush(&mut current),
                _ => {}
            }
        }
    }
    flush(&mut current);

    sentences
}

// ============ HTTP perplexity scorer ============

/// Scores sentences through a perplexity service.
///
/// Sends `POST {url}` with `{"text": "<sentence>"}` and expects
/// `{"perplexity": <number>}` back.
pub struct HttpPerplexityScorer {
    client: reqwest::Client,
    url: String,
    context_window: usize,
}

impl HttpPerplexityScorer {
    pub fn new(config: &FilterConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("filter.url required for http provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            context_window: config.context_window_tokens,
        })
    }
}

#[async_trait]
impl AnomalyScorer for HttpPerplexityScorer {
    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn score(&self, sentence: &str) -> Result<f64> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": sentence }))
            .send()
            .await
            .map_err(|e| PipelineError::dependency("anomaly scorer", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::dependency(
                "anomaly scorer",
                format!("HTTP {}: {}", status, body),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::dependency("anomaly scorer", e))?;

        json.get("perplexity")
            .and_then(|v| v.as_f64())
            .filter(|v| !v.is_nan())
            .ok_or_else(|| {
                PipelineError::dependency("anomaly scorer", "response missing numeric 'perplexity'")
            })
    }
}

/// Build the configured scorer, or `None` when filtering is disabled.
pub fn create_scorer(config: &FilterConfig) -> anyhow::Result<Option<Arc<dyn AnomalyScorer>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "http" => Ok(Some(Arc::new(HttpPerplexityScorer::new(config)?))),
        other => anyhow::bail!("Unknown filter provider: {}", other),
    }
}
