//! Document ingestion: directory walk → metadata → noise filter → chunks →
//! embeddings → vector index.
//!
//! [`DocumentIngestor`] turns eligible files into [`CleanDocument`]s.
//! Failures are per file: an unreadable file or one the filter empties is
//! logged and skipped, and the rest of the batch continues.
//!
//! [`Indexer`] chunks those documents, embeds the chunks in batches and
//! swaps them in for the document's previous chunks. A document is written
//! all-or-nothing: if any embedding call for it fails, none of its chunks
//! reach the index and the previous version stays in place.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::filter::SentenceQualityFilter;
use crate::models::{Chunk, CleanDocument, RawDocument};
use crate::store::{IndexEntry, VectorIndex};

pub const DEFAULT_CATEGORY: &str = "uncategorized";

const TITLE_PREFIX: &str = "Title:";
const CATEGORY_PREFIX: &str = "Category:";

pub struct DocumentIngestor {
    filter: SentenceQualityFilter,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl DocumentIngestor {
    pub fn new(filter: SentenceQualityFilter, config: &IngestConfig) -> anyhow::Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            filter,
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Load and clean every eligible file under `root`, in path order.
    ///
    /// A missing directory is [`PipelineError::NotFound`]; a directory with
    /// no eligible files yields an empty list.
    pub async fn load_directory(&self, root: &Path) -> Result<Vec<CleanDocument>> {
        let files = self.eligible_files(root)?;
        let mut documents = Vec::with_capacity(files.len());
        let mut skipped = 0usize;

        for (path, relative) in &files {
            match self.load_file(path, relative).await {
                Ok(Some(doc)) => {
                    tracing::info!(
                        file = %relative,
                        title = %doc.title,
                        accepted = doc.quality_trace.accepted(),
                        rejected = doc.quality_trace.rejected(),
                        "document loaded"
                    );
                    documents.push(doc);
                }
                Ok(None) => {
                    skipped += 1;
                    tracing::warn!(file = %relative, "no content left after cleaning; document dropped");
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(file = %relative, error = %format!("{:#}", e), "failed to load file");
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            files = files.len(),
            loaded = documents.len(),
            skipped,
            "directory loaded"
        );
        Ok(documents)
    }

    /// `(absolute path, path relative to root)` for every file the globs
    /// accept, sorted by relative path.
    pub fn eligible_files(&self, root: &Path) -> Result<Vec<(PathBuf, String)>> {
        if !root.exists() {
            return Err(PipelineError::not_found(format!(
                "directory does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(PipelineError::validation(
                "directory",
                format!("not a directory: {}", root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            if self.exclude.is_match(&relative) || !self.include.is_match(&relative) {
                continue;
            }
            files.push((path.to_path_buf(), relative));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    /// `Ok(None)` when the filter leaves nothing to index.
    async fn load_file(&self, path: &Path, relative: &str) -> anyhow::Result<Option<CleanDocument>> {
        let text = tokio::fs::read_to_string(path).await?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.to_string());

        let mut raw = parse_document(&text, &stem);
        raw.source_metadata
            .insert("source_file".to_string(), relative.to_string());
        raw.source_metadata
            .insert("file_path".to_string(), path.display().to_string());

        Ok(self.clean(raw).await)
    }

    /// Run the noise filter over a parsed document.
    pub async fn clean(&self, raw: RawDocument) -> Option<CleanDocument> {
        let (body_text, quality_trace) = self.filter.clean_with_trace(&raw.body_text).await;
        let emptied = body_text.trim().is_empty()
            || (self.filter.is_active() && quality_trace.accepted() == 0);
        if emptied {
            return None;
        }
        Some(CleanDocument {
            title: raw.title,
            category: raw.category,
            body_text,
            source_metadata: raw.source_metadata,
            quality_trace,
        })
    }
}

/// Split `Title:` / `Category:` header lines out of `text`.
///
/// The first occurrence of each wins; all metadata lines are removed from
/// the body. Missing values default to `fallback_title` and
/// [`DEFAULT_CATEGORY`].
pub fn parse_document(text: &str, fallback_title: &str) -> RawDocument {
    let mut title: Option<String> = None;
    let mut category: Option<String> = None;
    let mut body = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(value) = trimmed.strip_prefix(TITLE_PREFIX) {
            title.get_or_insert_with(|| value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix(CATEGORY_PREFIX) {
            category.get_or_insert_with(|| value.trim().to_string());
        } else {
            body.push(line);
        }
    }

    RawDocument {
        title: title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_title.to_string()),
        category: category
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        body_text: body.join("\n").trim().to_string(),
        source_metadata: BTreeMap::new(),
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Indexing ============

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Success,
    Failed,
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub title: String,
    pub category: String,
    pub chunks_created: usize,
    pub chunks_indexed: usize,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub total_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub total_chunks: usize,
    pub average_chunks_per_document: f64,
    pub dry_run: bool,
    pub details: Vec<DocumentOutcome>,
}

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Chunk, embed and upsert `documents`. With `dry_run` nothing is
    /// embedded or written; the report shows the chunks that would be.
    pub async fn index_documents(&self, documents: &[CleanDocument], dry_run: bool) -> IngestReport {
        let mut report = IngestReport {
            total_documents: documents.len(),
            dry_run,
            ..IngestReport::default()
        };

        for doc in documents {
            let outcome = self.index_document(doc, dry_run).await;
            match outcome.status {
                DocumentStatus::Failed => report.failed_documents += 1,
                _ => {
                    report.successful_documents += 1;
                    report.total_chunks += outcome.chunks_created;
                }
            }
            report.details.push(outcome);
        }

        if report.successful_documents > 0 {
            report.average_chunks_per_document =
                report.total_chunks as f64 / report.successful_documents as f64;
        }
        report
    }

    /// Chunk, embed and write one document, replacing whatever the index
    /// held for it before.
    pub async fn index_document(&self, doc: &CleanDocument, dry_run: bool) -> DocumentOutcome {
        let chunks = distinct_chunks(chunk_document(doc, &self.chunking));
        let mut outcome = DocumentOutcome {
            title: doc.title.clone(),
            category: doc.category.clone(),
            chunks_created: chunks.len(),
            chunks_indexed: 0,
            status: DocumentStatus::Planned,
            error: None,
        };
        if dry_run {
            return outcome;
        }

        match self.write_chunks(doc, &chunks).await {
            Ok(written) => {
                tracing::info!(title = %doc.title, chunks = written, "document indexed");
                outcome.chunks_indexed = written;
                outcome.status = DocumentStatus::Success;
            }
            Err(e) => {
                tracing::warn!(title = %doc.title, error = %e, "document not indexed");
                outcome.status = DocumentStatus::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    /// Write one document and return the ids of its chunks. Unlike
    /// [`index_document`](Self::index_document), failures propagate.
    pub async fn write_document(&self, doc: &CleanDocument) -> Result<Vec<String>> {
        let chunks = distinct_chunks(chunk_document(doc, &self.chunking));
        self.write_chunks(doc, &chunks).await?;
        Ok(chunks.into_iter().map(|c| c.id).collect())
    }

    /// Embed every chunk first, then swap them in for the document's
    /// previous chunks in one call.
    async fn write_chunks(&self, doc: &CleanDocument, chunks: &[Chunk]) -> Result<usize> {
        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_texts(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(PipelineError::dependency(
                    "embedder",
                    format!("expected {} vectors, got {}", batch.len(), vectors.len()),
                ));
            }
            entries.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector)),
            );
        }

        let written = entries.len();
        let replaced = self
            .index
            .replace_document(&doc.title, &doc.category, entries)
            .await?;
        if replaced > 0 {
            tracing::debug!(title = %doc.title, replaced, "previous chunks removed");
        }
        Ok(written)
    }
}

/// Keep the first chunk for each id. Repeated passages hash to the same
/// id and would otherwise be counted once per copy.
fn distinct_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.id.clone()))
        .collect()
}
