//! End-to-end pipeline tests over in-memory backends.
//!
//! Every external collaborator is a small deterministic fake: a keyword
//! embedder, a constant anomaly scorer, a counting reranker, a recording
//! generator and a fixed evaluator.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use rag_quality::answer::{AnswerComposer, NO_CONTEXT_ANSWER};
use rag_quality::config::{ChunkingConfig, EvaluationConfig, FilterConfig, IngestConfig, RetrievalConfig};
use rag_quality::embedding::EmbeddingProvider;
use rag_quality::error::Result;
use rag_quality::evaluation::evaluator::{EvalRow, Evaluator};
use rag_quality::evaluation::metrics::{
    generate_recommendations, ScoreDistribution, HEALTHY_MESSAGE,
};
use rag_quality::evaluation::scores::{ColumnarExtractor, ScoreExtractor};
use rag_quality::evaluation::EvaluationEngine;
use rag_quality::filter::{AnomalyScorer, SentenceQualityFilter};
use rag_quality::generation::AnswerGenerator;
use rag_quality::ingest::{DocumentIngestor, Indexer};
use rag_quality::interactions::memory::InMemoryInteractions;
use rag_quality::interactions::InteractionStore;
use rag_quality::models::Metric;
use rag_quality::pipeline::{NewDocument, RagPipeline, Services};
use rag_quality::rerank::{PairwiseScorer, Reranker};
use rag_quality::retrieval::RetrievalEngine;
use rag_quality::store::memory::InMemoryIndex;
use rag_quality::store::VectorIndex;

// ============ Fakes ============

const VOCABULARY: [&str; 6] = ["refund", "credit", "vacation", "employee", "approval", "purchase"];

/// One dimension per vocabulary word plus a constant bias dimension.
struct KeywordEmbedder;

fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCABULARY
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.1);
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Every sentence looks like ordinary prose.
struct CalmScorer;

#[async_trait]
impl AnomalyScorer for CalmScorer {
    fn context_window(&self) -> usize {
        1024
    }
    async fn score(&self, _sentence: &str) -> Result<f64> {
        Ok(25.0)
    }
}

/// Prefers passages mentioning refunds; counts its calls.
#[derive(Default)]
struct CountingReranker {
    calls: AtomicUsize,
}

#[async_trait]
impl PairwiseScorer for CountingReranker {
    fn model_name(&self) -> &str {
        "counting"
    }
    async fn score_pairs(&self, _query: &str, passages: &[String]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(passages
            .iter()
            .map(|p| if p.to_lowercase().contains("refund") { 2.0 } else { 0.5 })
            .collect())
    }
}

#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push(format!("{}\n{}", system, user));
        Ok("Refunds are issued within 14 days (Refund Policy – finance).".to_string())
    }
}

struct FixedEvaluator(Value);

#[async_trait]
impl Evaluator for FixedEvaluator {
    fn name(&self) -> &str {
        "fixed"
    }
    fn extractor(&self) -> &dyn ScoreExtractor {
        &ColumnarExtractor
    }
    async fn evaluate(&self, _rows: &[EvalRow]) -> Result<Value> {
        Ok(self.0.clone())
    }
}

// ============ Harness ============

struct Harness {
    _tmp: TempDir,
    docs: std::path::PathBuf,
    ingestor: DocumentIngestor,
    indexer: Indexer,
    index: Arc<InMemoryIndex>,
    interactions: Arc<InMemoryInteractions>,
    reranker: Arc<CountingReranker>,
    generator: Arc<RecordingGenerator>,
    pipeline: RagPipeline,
}

fn write_corpus(dir: &Path) {
    std::fs::write(
        dir.join("refunds.txt"),
        "Title: Refund Policy\nCategory: finance\n\
         A refund is issued within 14 days of purchase. \
         Late refund requests receive store credit instead.",
    )
    .unwrap();
    std::fs::write(
        dir.join("vacation.txt"),
        "Title: Vacation Policy\nCategory: hr\n\
         Each employee accrues vacation every month. \
         Vacation requests need manager approval.",
    )
    .unwrap();
    std::fs::write(
        dir.join("noise.txt"),
        "Title: Scratch\nCategory: misc\n\
         Fictitious data must be ignored by the model.\n\
         This paragraph is an example of deliberate textual noise.",
    )
    .unwrap();
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    write_corpus(&docs);

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
    let index = Arc::new(InMemoryIndex::new());
    let interactions = Arc::new(InMemoryInteractions::new());
    let reranker = Arc::new(CountingReranker::default());
    let generator = Arc::new(RecordingGenerator::default());

    let filter = SentenceQualityFilter::new(Some(Arc::new(CalmScorer)), &FilterConfig::default());
    let ingestor = DocumentIngestor::new(filter, &IngestConfig::default()).unwrap();
    let indexer = Indexer::new(
        embedder.clone(),
        index.clone(),
        ChunkingConfig::default(),
        16,
    );

    let retrieval = RetrievalEngine::new(
        embedder,
        index.clone(),
        Reranker::new(Some(reranker.clone())),
        &RetrievalConfig::default(),
    );
    let pipeline = RagPipeline::new(
        retrieval,
        AnswerComposer::new(generator.clone()),
        interactions.clone(),
        5,
    );

    Harness {
        _tmp: tmp,
        docs,
        ingestor,
        indexer,
        index,
        interactions,
        reranker,
        generator,
        pipeline,
    }
}

async fn ingest(h: &Harness) -> usize {
    let documents = h.ingestor.load_directory(&h.docs).await.unwrap();
    let report = h.indexer.index_documents(&documents, false).await;
    assert_eq!(report.failed_documents, 0);
    documents.len()
}

/// Wire the harness components into a [`Services`] bundle.
fn services(h: Harness) -> (TempDir, Arc<InMemoryIndex>, Services) {
    let Harness {
        _tmp: tmp,
        ingestor,
        indexer,
        index,
        interactions,
        pipeline,
        ..
    } = h;
    let evaluation = EvaluationEngine::new(
        interactions.clone(),
        Arc::new(FixedEvaluator(json!({}))),
        EvaluationConfig::default(),
    );
    let services = Services {
        pipeline,
        evaluation,
        ingestor,
        indexer,
        index: index.clone(),
        interactions,
        embedder: Arc::new(KeywordEmbedder),
    };
    (tmp, index, services)
}

fn credit_document(content: &str) -> NewDocument {
    NewDocument {
        title: "Credit Policy".into(),
        category: Some("finance".into()),
        content: content.into(),
        metadata: BTreeMap::new(),
    }
}

// ============ Ingestion ============

#[tokio::test]
async fn test_noise_only_document_is_dropped() {
    let h = harness();
    let documents = h.ingestor.load_directory(&h.docs).await.unwrap();
    let titles: Vec<&str> = documents.iter().map(|d| d.title.as_str()).collect();
    assert_eq!(titles, vec!["Refund Policy", "Vacation Policy"]);
}

#[tokio::test]
async fn test_ingestion_twice_leaves_index_unchanged() {
    let h = harness();
    assert_eq!(ingest(&h).await, 2);
    let first = h.index.entries().await.unwrap();
    ingest(&h).await;
    let second = h.index.entries().await.unwrap();

    assert_eq!(first.len(), second.len());
    let ids = |entries: &[rag_quality::store::IndexEntry]| -> Vec<String> {
        entries.iter().map(|e| e.id.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn test_added_document_is_retrievable_by_id_and_replaced_on_edit() {
    let (_tmp, index, services) = services(harness());

    let first = services
        .add_document(credit_document("The credit limit is 1000 dollars."))
        .await
        .unwrap();
    assert_eq!(first.chunk_ids.len(), 1);
    let stored = services.get_chunk(&first.chunk_ids[0]).await.unwrap();
    assert_eq!(stored.title, "Credit Policy");
    assert_eq!(stored.category, "finance");
    assert_eq!(stored.content, "The credit limit is 1000 dollars.");

    let second = services
        .add_document(credit_document("The credit limit is 5000 dollars."))
        .await
        .unwrap();
    let texts: Vec<String> = index.entries().await.unwrap().into_iter().map(|e| e.text).collect();
    assert_eq!(texts, vec!["The credit limit is 5000 dollars."]);
    assert_eq!(
        services.get_chunk(&first.chunk_ids[0]).await.unwrap_err().code(),
        "not_found"
    );
    assert!(services.get_chunk(&second.chunk_ids[0]).await.is_ok());
}

#[tokio::test]
async fn test_added_document_rejects_blank_and_noise_only_content() {
    let (_tmp, index, services) = services(harness());

    let blank = services.add_document(credit_document("   ")).await.unwrap_err();
    assert_eq!(blank.code(), "validation_error");

    let noise = services
        .add_document(credit_document("Fictitious data must be ignored by the model."))
        .await
        .unwrap_err();
    assert_eq!(noise.code(), "validation_error");
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset_index_keeps_interactions() {
    let h = harness();
    ingest(&h).await;
    let (_tmp, index, services) = services(h);
    let asked = services
        .pipeline
        .ask("How long does a refund take?", None, None)
        .await
        .unwrap();

    let removed = services.reset_index().await.unwrap();
    assert!(removed > 0);
    assert_eq!(index.count().await.unwrap(), 0);
    assert!(services
        .interactions
        .get(&asked.interaction_id)
        .await
        .unwrap()
        .found()
        .is_some());
}

// ============ Retrieval and answering ============

#[tokio::test]
async fn test_ask_answers_from_relevant_context() {
    let h = harness();
    ingest(&h).await;

    let response = h
        .pipeline
        .ask("How long does a refund take?", Some(2), None)
        .await
        .unwrap();

    assert!(response.has_context);
    assert_eq!(response.sources[0].title, "Refund Policy");
    assert_eq!(response.context_used, response.sources.len());

    let prompts = h.generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("[Document 1]"));
    assert!(prompts[0].contains("Title: Refund Policy"));
    drop(prompts);

    let stored = h
        .interactions
        .get(&response.interaction_id)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(stored.contexts.len(), response.sources.len());
    assert_eq!(stored.model_version, "recording");
    assert_eq!(stored.embedding_model, "keyword");
}

#[tokio::test]
async fn test_unknown_category_yields_no_context() {
    let h = harness();
    ingest(&h).await;

    let search = h
        .pipeline
        .search("refund", None, Some("legal"))
        .await
        .unwrap();
    assert!(search.results.is_empty());
    assert_eq!(search.total_found, 0);

    let response = h
        .pipeline
        .ask("How long does a refund take?", None, Some("legal"))
        .await
        .unwrap();
    assert!(!response.has_context);
    assert_eq!(response.answer, NO_CONTEXT_ANSWER);
    assert!(response.sources.is_empty());

    // empty coarse stage: neither the reranker nor the generator ran
    assert_eq!(h.reranker.calls.load(Ordering::SeqCst), 0);
    assert!(h.generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_results_are_ranked_and_prefix_stable() {
    let h = harness();
    ingest(&h).await;

    let one = h.pipeline.search("vacation refund", Some(1), None).await.unwrap();
    let two = h.pipeline.search("vacation refund", Some(2), None).await.unwrap();

    // both limits over-fetch the whole two-chunk index
    assert_eq!(one.results.len(), 1);
    assert_eq!(two.results.len(), 2);
    assert_eq!(one.results[0].chunk_id, two.results[0].chunk_id);
    assert_eq!(two.results[0].title, "Refund Policy");
    assert!(two.results[0].rerank_score >= two.results[1].rerank_score);
    assert!(h.reranker.calls.load(Ordering::SeqCst) >= 2);
}

// ============ Feedback and evaluation ============

#[tokio::test]
async fn test_feedback_validation() {
    let h = harness();
    ingest(&h).await;
    let response = h
        .pipeline
        .ask("How long does a refund take?", None, None)
        .await
        .unwrap();

    for bad in [0, 6, -1] {
        let err = h
            .pipeline
            .submit_feedback(&response.interaction_id, bad)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
    h.pipeline
        .submit_feedback(&response.interaction_id, 5)
        .await
        .unwrap();

    let stored = h
        .interactions
        .get(&response.interaction_id)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(stored.user_feedback, Some(5));
    assert!(stored.quality_scores.is_none());
}

#[tokio::test]
async fn test_evaluation_excludes_missing_scores() {
    let h = harness();
    ingest(&h).await;

    let mut ids = Vec::new();
    for q in [
        "How long does a refund take?",
        "Who approves vacation requests?",
        "Is store credit offered?",
    ] {
        ids.push(h.pipeline.ask(q, None, None).await.unwrap().interaction_id);
    }
    h.pipeline.submit_feedback(&ids[0], 5).await.unwrap();

    let evaluator = Arc::new(FixedEvaluator(json!({
        "faithfulness": [0.9, null, 0.7],
        "answer_relevancy": [null, null, null]
    })));
    let engine = EvaluationEngine::new(
        h.interactions.clone(),
        evaluator,
        EvaluationConfig::default(),
    );
    let report = engine.evaluate(Some(ids), None, true).await.unwrap();

    assert_eq!(report.total_interactions, 3);
    assert!((report.average_scores[&Metric::Faithfulness] - 0.8).abs() < 1e-9);
    assert!(!report.average_scores.contains_key(&Metric::AnswerRelevancy));
    assert_eq!(report.persisted, 2);
    assert_eq!(report.perceived_precision.value, Some(1.0));
    assert_eq!(report.perceived_precision.count, 1);
    assert!(!report.recommendations.is_empty());

    let quality = engine.quality_report(Some(1)).await.unwrap();
    assert_eq!(quality.total_interactions, 2);
}

#[test]
fn test_recommendations_are_total() {
    let healthy = generate_recommendations(
        &BTreeMap::new(),
        &ScoreDistribution::default(),
        &BTreeMap::new(),
    );
    assert_eq!(healthy, vec![HEALTHY_MESSAGE.to_string()]);

    let mut weak = BTreeMap::new();
    weak.insert(Metric::Faithfulness, 0.4);
    let advice = generate_recommendations(&weak, &ScoreDistribution::default(), &BTreeMap::new());
    assert!(!advice.is_empty());
    assert!(!advice.contains(&HEALTHY_MESSAGE.to_string()));
}
