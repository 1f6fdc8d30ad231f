//! External evaluator backends.
//!
//! | `evaluation.provider` | Backend | Raw shape |
//! |-----------------------|---------|-----------|
//! | `"disabled"` | [`DisabledEvaluator`] | always fails |
//! | `"llm-judge"` | [`LlmJudgeEvaluator`] | one JSON object per row |
//! | `"http"` | [`HttpEvaluator`] | columnar arrays |
//!
//! Each backend pairs with the [`ScoreExtractor`] that understands its
//! output; the engine never looks at raw JSON itself.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::scores::{ColumnarExtractor, RowExtractor, ScoreExtractor};
use crate::config::EvaluationConfig;
use crate::embedding::post_with_retry;
use crate::error::{PipelineError, Result};
use crate::generation::AnswerGenerator;
use crate::models::Metric;

const COMPONENT: &str = "evaluator";

/// One interaction as the evaluator sees it.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRow {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<String>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    fn extractor(&self) -> &dyn ScoreExtractor;

    /// Score `rows`. The result may be partial; the extractor decides what
    /// is usable.
    async fn evaluate(&self, rows: &[EvalRow]) -> Result<Value>;
}

pub struct DisabledEvaluator;

#[async_trait]
impl Evaluator for DisabledEvaluator {
    fn name(&self) -> &str {
        "disabled"
    }

    fn extractor(&self) -> &dyn ScoreExtractor {
        &ColumnarExtractor
    }

    async fn evaluate(&self, _rows: &[EvalRow]) -> Result<Value> {
        Err(PipelineError::dependency(
            COMPONENT,
            "evaluation is disabled; set [evaluation].provider",
        ))
    }
}

// ============ LLM judge ============

const JUDGE_INSTRUCTIONS: &str = "You grade answers produced by a retrieval-augmented assistant.\n\
Return ONLY a JSON object with two numbers between 0 and 1:\n\
- \"faithfulness\": how fully the answer's claims are supported by the contexts\n\
- \"answer_relevancy\": how directly the answer addresses the question\n\
Example: {\"faithfulness\": 0.8, \"answer_relevancy\": 0.9}";

/// Grades each row by asking the configured generator for a JSON verdict.
///
/// Rows are graded one at a time; a row whose call fails or whose reply
/// holds no JSON object becomes `null` without affecting the others.
pub struct LlmJudgeEvaluator {
    generator: Arc<dyn AnswerGenerator>,
}

impl LlmJudgeEvaluator {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }
}

fn judge_message(row: &EvalRow) -> String {
    let mut message = format!("QUESTION:\n{}\n\nCONTEXTS:\n", row.question);
    for (i, context) in row.contexts.iter().enumerate() {
        message.push_str(&format!("[{}] {}\n", i + 1, context));
    }
    message.push_str(&format!("\nANSWER:\n{}", row.answer));
    message
}

/// First `{...}` span of `reply` parsed as JSON.
pub(crate) fn parse_verdict(reply: &str) -> Option<Value> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&reply[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[async_trait]
impl Evaluator for LlmJudgeEvaluator {
    fn name(&self) -> &str {
        "llm-judge"
    }

    fn extractor(&self) -> &dyn ScoreExtractor {
        &RowExtractor
    }

    async fn evaluate(&self, rows: &[EvalRow]) -> Result<Value> {
        let mut verdicts = Vec::with_capacity(rows.len());
        let mut failures = 0usize;

        for row in rows {
            match self.generator.generate(JUDGE_INSTRUCTIONS, &judge_message(row)).await {
                Ok(reply) => match parse_verdict(&reply) {
                    Some(verdict) => verdicts.push(verdict),
                    None => {
                        tracing::warn!("judge reply held no JSON verdict");
                        verdicts.push(Value::Null);
                    }
                },
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, "judge call failed; row left unscored");
                    verdicts.push(Value::Null);
                }
            }
        }

        if !rows.is_empty() && failures == rows.len() {
            return Err(PipelineError::dependency(
                COMPONENT,
                "every judge call failed",
            ));
        }
        Ok(Value::Array(verdicts))
    }
}

// ============ Remote HTTP evaluator ============

/// Posts `{"rows": [...], "metrics": [...]}` and expects columnar arrays
/// keyed by metric name.
pub struct HttpEvaluator {
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpEvaluator {
    pub fn new(config: &EvaluationConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("evaluation.url is required for the http evaluator"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    fn name(&self) -> &str {
        "http"
    }

    fn extractor(&self) -> &dyn ScoreExtractor {
        &ColumnarExtractor
    }

    async fn evaluate(&self, rows: &[EvalRow]) -> Result<Value> {
        let metrics: Vec<&str> = Metric::ALL.iter().map(Metric::as_str).collect();
        let body = serde_json::json!({ "rows": rows, "metrics": metrics });
        post_with_retry(self.max_retries, "Evaluator", || {
            self.client.post(&self.url).json(&body)
        })
        .await
        .map_err(|e| PipelineError::dependency(COMPONENT, format!("{:#}", e)))
    }
}

pub fn create_evaluator(
    config: &EvaluationConfig,
    generator: Arc<dyn AnswerGenerator>,
) -> anyhow::Result<Arc<dyn Evaluator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEvaluator)),
        "llm-judge" => Ok(Arc::new(LlmJudgeEvaluator::new(generator))),
        "http" => Ok(Arc::new(HttpEvaluator::new(config)?)),
        other => anyhow::bail!("Unknown evaluation provider: {}", other),
    }
}
