//! End-to-end orchestration and service wiring.
//!
//! [`RagPipeline`] answers one question at a time: validate, retrieve,
//! compose, time, persist. Retrieval failures on this path degrade to the
//! no-context answer; the interaction is recorded either way.
//!
//! [`Services`] builds every component once from a [`Config`] and hands out
//! shared references. Nothing in the crate holds global state, so tests
//! assemble the same pieces from fakes.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::answer::{AnswerComposer, AnswerError, ComposedAnswer};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Lookup, PipelineError, Result};
use crate::evaluation::evaluator::create_evaluator;
use crate::evaluation::EvaluationEngine;
use crate::filter::{create_scorer, SentenceQualityFilter};
use crate::generation::create_generator;
use crate::ingest::{DocumentIngestor, IngestReport, Indexer, DEFAULT_CATEGORY};
use crate::interactions::sqlite::SqliteInteractions;
use crate::interactions::InteractionStore;
use crate::models::{Interaction, RawDocument, ScoredCandidate, SourceRef};
use crate::rerank::create_reranker;
use crate::retrieval::{analyze_quality, RetrievalEngine, SearchQuality};
use crate::store::sqlite::SqliteIndex;
use crate::store::{IndexEntry, VectorIndex};
use crate::validation;

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub interaction_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub previews: Vec<String>,
    pub context_used: usize,
    pub has_context: bool,
    pub response_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AnswerError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub category: Option<String>,
    pub total_found: usize,
    pub results: Vec<ScoredCandidate>,
    pub quality: SearchQuality,
}

/// A document supplied inline instead of read from a directory.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddDocumentResponse {
    pub title: String,
    pub category: String,
    pub chunk_ids: Vec<String>,
    pub sentences_rejected: usize,
}

/// One indexed chunk as returned by a lookup.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub metadata: BTreeMap<String, String>,
}

impl From<IndexEntry> for StoredChunk {
    fn from(entry: IndexEntry) -> Self {
        StoredChunk {
            id: entry.id,
            title: entry.metadata.title,
            category: entry.metadata.category,
            content: entry.text,
            chunk_index: entry.metadata.chunk_index,
            total_chunks: entry.metadata.total_chunks,
            metadata: entry.metadata.source,
        }
    }
}

pub struct RagPipeline {
    retrieval: RetrievalEngine,
    composer: AnswerComposer,
    interactions: Arc<dyn InteractionStore>,
    default_limit: usize,
}

impl RagPipeline {
    pub fn new(
        retrieval: RetrievalEngine,
        composer: AnswerComposer,
        interactions: Arc<dyn InteractionStore>,
        default_limit: usize,
    ) -> Self {
        Self {
            retrieval,
            composer,
            interactions,
            default_limit,
        }
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    /// Answer `question` from at most `max_documents` passages and record
    /// the interaction.
    pub async fn ask(
        &self,
        question: &str,
        max_documents: Option<usize>,
        category: Option<&str>,
    ) -> Result<AskResponse> {
        let started = Instant::now();
        let question = validation::question(question)?;
        let limit = validation::max_documents(max_documents.unwrap_or(self.default_limit))?;
        let category = validation::category(category);

        let candidates = match self
            .retrieval
            .search(&question, limit, category.as_deref())
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed; answering without context");
                Vec::new()
            }
        };

        let composed: ComposedAnswer = self.composer.compose(&question, &candidates).await;
        let response_time = started.elapsed().as_secs_f64();

        let interaction = Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            question: question.clone(),
            answer: composed.answer.clone(),
            contexts: composed.contexts.clone(),
            sources: composed.sources.clone(),
            response_time,
            user_feedback: None,
            quality_scores: None,
            model_version: self.composer.model_name().to_string(),
            embedding_model: self.retrieval.embedding_model().to_string(),
        };
        self.interactions.insert(&interaction).await?;

        tracing::info!(
            interaction_id = %interaction.id,
            context_used = composed.context_used,
            has_context = composed.has_context,
            response_time,
            "question answered"
        );

        Ok(AskResponse {
            interaction_id: interaction.id,
            question,
            answer: composed.answer,
            sources: composed.sources,
            previews: composed.previews,
            context_used: composed.context_used,
            has_context: composed.has_context,
            response_time,
            error: composed.error,
        })
    }

    /// Ranked passages plus a quality summary. Unlike [`ask`](Self::ask),
    /// embedding and index failures propagate.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        category: Option<&str>,
    ) -> Result<SearchResponse> {
        let query = validation::query(query)?;
        let limit = validation::limit(limit.unwrap_or(self.default_limit))?;
        let category = validation::category(category);

        let results = self
            .retrieval
            .search(&query, limit, category.as_deref())
            .await?;
        let quality = analyze_quality(&results);
        Ok(SearchResponse {
            query,
            category,
            total_found: results.len(),
            results,
            quality,
        })
    }

    /// Record a 1–5 rating. Touches only `user_feedback`.
    pub async fn submit_feedback(&self, interaction_id: &str, rating: i64) -> Result<()> {
        let rating = validation::rating(rating)?;
        if !self.interactions.set_feedback(interaction_id, rating).await? {
            return Err(PipelineError::not_found(format!(
                "interaction not found: {}",
                interaction_id
            )));
        }
        tracing::info!(interaction_id, rating, "feedback recorded");
        Ok(())
    }
}

/// Every component, built once.
pub struct Services {
    pub pipeline: RagPipeline,
    pub evaluation: EvaluationEngine,
    pub ingestor: DocumentIngestor,
    pub indexer: Indexer,
    pub index: Arc<dyn VectorIndex>,
    pub interactions: Arc<dyn InteractionStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Services {
    /// Wire the configured providers over SQLite-backed stores.
    pub fn from_config(config: &Config, pool: SqlitePool) -> anyhow::Result<Self> {
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(pool.clone()));
        let interactions: Arc<dyn InteractionStore> = Arc::new(SqliteInteractions::new(pool));
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        let filter = SentenceQualityFilter::new(create_scorer(&config.filter)?, &config.filter);
        if !filter.is_active() {
            tracing::info!("sentence filter disabled; documents are indexed as written");
        }

        let retrieval = RetrievalEngine::new(
            embedder.clone(),
            index.clone(),
            create_reranker(&config.rerank)?,
            &config.retrieval,
        );
        let pipeline = RagPipeline::new(
            retrieval,
            AnswerComposer::new(generator.clone()),
            interactions.clone(),
            config.retrieval.default_limit,
        );
        let evaluation = EvaluationEngine::new(
            interactions.clone(),
            create_evaluator(&config.evaluation, generator)?,
            config.evaluation.clone(),
        );

        Ok(Services {
            pipeline,
            evaluation,
            ingestor: DocumentIngestor::new(filter, &config.ingest)?,
            indexer: Indexer::new(
                embedder.clone(),
                index.clone(),
                config.chunking.clone(),
                config.embedding.batch_size,
            ),
            index,
            interactions,
            embedder,
        })
    }

    /// Load, clean, chunk and index every eligible file under `dir`.
    pub async fn load_documents(&self, dir: &Path, dry_run: bool) -> Result<IngestReport> {
        let documents = self.ingestor.load_directory(dir).await?;
        if documents.is_empty() {
            return Err(PipelineError::not_found(format!(
                "no documents to index under {}",
                dir.display()
            )));
        }
        let report = self.indexer.index_documents(&documents, dry_run).await;
        tracing::info!(
            documents = report.total_documents,
            succeeded = report.successful_documents,
            failed = report.failed_documents,
            chunks = report.total_chunks,
            dry_run,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Clean, chunk and index a single inline document, replacing any
    /// earlier version with the same title and category.
    pub async fn add_document(&self, doc: NewDocument) -> Result<AddDocumentResponse> {
        let raw = RawDocument {
            title: validation::title(&doc.title)?,
            category: validation::category(doc.category.as_deref())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            body_text: validation::content(&doc.content)?,
            source_metadata: doc.metadata,
        };
        let clean = self.ingestor.clean(raw).await.ok_or_else(|| {
            PipelineError::validation("content", "nothing left to index after noise filtering")
        })?;

        let chunk_ids = self.indexer.write_document(&clean).await?;
        tracing::info!(
            title = %clean.title,
            category = %clean.category,
            chunks = chunk_ids.len(),
            "document added"
        );
        Ok(AddDocumentResponse {
            sentences_rejected: clean.quality_trace.rejected(),
            title: clean.title,
            category: clean.category,
            chunk_ids,
        })
    }

    /// Look up one indexed chunk by id.
    pub async fn get_chunk(&self, id: &str) -> Result<StoredChunk> {
        let entry: Lookup<IndexEntry> = self.index.get(id.trim()).await?;
        entry
            .or_not_found(format!("document not found: {}", id))
            .map(StoredChunk::from)
    }

    /// Drop every indexed chunk. Recorded interactions are kept.
    pub async fn reset_index(&self) -> Result<usize> {
        let removed = self.index.clear().await?;
        tracing::info!(removed, "index cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::generation::AnswerGenerator;
    use crate::interactions::memory::InMemoryInteractions;
    use crate::rerank::Reranker;
    use crate::store::memory::InMemoryIndex;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(PipelineError::dependency("embedder", "offline"))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, _system: &str, user: &str) -> Result<String> {
            Ok(user.to_string())
        }
    }

    fn pipeline(store: Arc<InMemoryInteractions>) -> RagPipeline {
        let retrieval = RetrievalEngine::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryIndex::new()),
            Reranker::default(),
            &RetrievalConfig::default(),
        );
        RagPipeline::new(retrieval, AnswerComposer::new(Arc::new(EchoGenerator)), store, 5)
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_no_context() {
        let store = Arc::new(InMemoryInteractions::new());
        let pipeline = pipeline(store.clone());
        let response = pipeline.ask("What is the credit policy?", None, None).await.unwrap();
        assert!(!response.has_context);
        assert_eq!(response.answer, crate::answer::NO_CONTEXT_ANSWER);

        let stored = store.get(&response.interaction_id).await.unwrap().found().unwrap();
        assert_eq!(stored.model_version, "echo");
        assert_eq!(stored.embedding_model, "failing");
    }

    #[tokio::test]
    async fn test_search_propagates_embedding_failure() {
        let pipeline = pipeline(Arc::new(InMemoryInteractions::new()));
        let err = pipeline.search("credit", None, None).await.unwrap_err();
        assert_eq!(err.code(), "dependency_error");
    }

    #[tokio::test]
    async fn test_ask_validates_input() {
        let pipeline = pipeline(Arc::new(InMemoryInteractions::new()));
        assert_eq!(
            pipeline.ask("hi", None, None).await.unwrap_err().code(),
            "validation_error"
        );
        assert_eq!(
            pipeline.ask("What now?", Some(21), None).await.unwrap_err().code(),
            "validation_error"
        );
    }

    #[tokio::test]
    async fn test_feedback_unknown_id_and_bad_rating() {
        let pipeline = pipeline(Arc::new(InMemoryInteractions::new()));
        assert_eq!(
            pipeline.submit_feedback("missing-interaction", 4).await.unwrap_err().code(),
            "not_found"
        );
        assert_eq!(
            pipeline.submit_feedback("missing-interaction", 9).await.unwrap_err().code(),
            "validation_error"
        );
    }
}
