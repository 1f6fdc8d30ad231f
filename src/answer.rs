//! Grounded answer composition.
//!
//! Formats retrieved chunks as numbered `[Document N]` blocks, wraps them
//! in instructions that restrict the generator to that context and require
//! per-claim citations, and returns the generated text with a `sources`
//! list whose indices match the labels.
//!
//! An empty candidate list short-circuits to [`NO_CONTEXT_ANSWER`]; the
//! generator is never called without context.

use serde::Serialize;
use std::sync::Arc;

use crate::generation::AnswerGenerator;
use crate::models::{ScoredCandidate, SourceRef};

pub const NO_CONTEXT_ANSWER: &str =
    "Sorry, I did not find relevant documents to answer your question.";

/// Characters of each context shown in result previews.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct AnswerError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Full text of every context passed to the generator, in label order.
    pub contexts: Vec<String>,
    pub previews: Vec<String>,
    pub context_used: usize,
    pub has_context: bool,
    /// Set when generation failed and `answer` is a fallback message.
    pub error: Option<AnswerError>,
}

pub struct AnswerComposer {
    generator: Arc<dyn AnswerGenerator>,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub async fn compose(&self, question: &str, candidates: &[ScoredCandidate]) -> ComposedAnswer {
        if candidates.is_empty() {
            return ComposedAnswer::no_context();
        }

        let sources = sources_for(candidates);
        let contexts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let previews = contexts.iter().map(|c| preview(c)).collect();
        let instructions = build_instructions(&build_context(candidates));

        let (answer, error) = match self
            .generator
            .generate(&instructions, &build_user_message(question))
            .await
        {
            Ok(text) => (text, None),
            Err(e) => {
                tracing::warn!(error = %e, "generation failed; returning fallback answer");
                (
                    format!("Error generating answer: {}", e),
                    Some(AnswerError {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                )
            }
        };

        ComposedAnswer {
            answer,
            sources,
            contexts,
            previews,
            context_used: candidates.len(),
            has_context: true,
            error,
        }
    }
}

impl ComposedAnswer {
    pub fn no_context() -> Self {
        ComposedAnswer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
            contexts: Vec::new(),
            previews: Vec::new(),
            context_used: 0,
            has_context: false,
            error: None,
        }
    }
}

/// `[Document N]` blocks, numbered from 1.
pub fn build_context(candidates: &[ScoredCandidate]) -> String {
    let mut context = String::new();
    for (i, c) in candidates.iter().enumerate() {
        context.push_str(&format!(
            "[Document {}]\nTitle: {}\nCategory: {}\nContent: {}\n\n",
            i + 1,
            c.title,
            c.category,
            c.content
        ));
    }
    context
}

pub fn build_instructions(context: &str) -> String {
    format!(
        "You are an assistant that answers questions using only the documents provided.\n\
         \n\
         RULES:\n\
         1. Use ONLY the information in the documents below to answer.\n\
         2. If the documents do not contain the answer, say that there is not enough information.\n\
         3. Cite the source as [Document N] at the end of every claim.\n\
         4. Where possible also cite it as (title – category) at the end of every claim.\n\
         5. Be precise and objective; do not invent facts.\n\
         6. Keep a professional tone.\n\
         \n\
         DOCUMENTS:\n\
         {}",
        context
    )
}

pub fn build_user_message(question: &str) -> String {
    format!(
        "Question: {}\n\nAnswer using only the documents provided above.",
        question
    )
}

fn sources_for(candidates: &[ScoredCandidate]) -> Vec<SourceRef> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| SourceRef {
            index: i + 1,
            title: c.title.clone(),
            category: c.category.clone(),
            similarity: c.coarse_similarity,
        })
        .collect()
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}
