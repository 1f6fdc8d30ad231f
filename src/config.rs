//! TOML configuration.
//!
//! Only `[db]` is mandatory; every other section falls back to defaults
//! that reproduce the stock pipeline (500-char chunks with 50 chars of
//! overlap, a perplexity threshold of 600, 3x coarse over-fetch capped at
//! 20, a 30-day trend window with a 0.05 dead band).
//!
//! External collaborators are selected per section with a `provider`
//! string; `"disabled"` is always accepted and makes the corresponding
//! stage degrade instead of fail.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    /// Endpoint of the perplexity service when `provider = "http"`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_context_window")]
    pub context_window_tokens: usize,
    #[serde(default = "default_filter_timeout")]
    pub timeout_secs: u64,
    /// Sentences that score high but are known to be legitimate.
    #[serde(default = "default_exceptions")]
    pub exceptions: Vec<String>,
    /// Sentences that score low but are known to be noise.
    #[serde(default = "default_forced_noise")]
    pub forced_noise: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            threshold: default_threshold(),
            min_tokens: default_min_tokens(),
            context_window_tokens: default_context_window(),
            timeout_secs: default_filter_timeout(),
            exceptions: default_exceptions(),
            forced_noise: default_forced_noise(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_threshold() -> f64 {
    600.0
}
fn default_min_tokens() -> usize {
    3
}
fn default_context_window() -> usize {
    1024
}
fn default_filter_timeout() -> u64 {
    10
}
fn default_exceptions() -> Vec<String> {
    vec![
        "Employees must submit documents through the digital platform.".to_string(),
        "Customers with outstanding debts must settle them before a new credit analysis."
            .to_string(),
    ]
}
fn default_forced_noise() -> Vec<String> {
    vec![
        "Fictitious data must be ignored by the model.".to_string(),
        "This paragraph is an example of deliberate textual noise.".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: default_overfetch(),
            max_candidates: default_max_candidates(),
            default_limit: default_limit(),
        }
    }
}

fn default_overfetch() -> usize {
    3
}
fn default_max_candidates() -> usize {
    20
}
fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_rerank_model(),
        }
    }
}

fn default_rerank_model() -> String {
    "bge-reranker-base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Base URL for Ollama or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    /// Remote evaluator endpoint when `provider = "http"`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_eval_batch")]
    pub default_batch_size: usize,
    #[serde(default = "default_max_ids")]
    pub max_ids: usize,
    #[serde(default = "default_min_id_len")]
    pub min_id_len: usize,
    /// History compared against by trend analysis, and the default
    /// window of the quality report.
    #[serde(default = "default_trend_window")]
    pub trend_window_days: i64,
    #[serde(default = "default_trend_epsilon")]
    pub trend_epsilon: f64,
    /// Source similarity above which a retrieved passage counts as relevant.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    /// Estimate recall from the context count when sources are missing.
    #[serde(default = "default_true")]
    pub recall_context_fallback: bool,
    #[serde(default = "default_eval_timeout")]
    pub timeout_secs: u64,
    /// Retries for the `http` evaluator on 429 and 5xx responses.
    #[serde(default = "default_eval_retries")]
    pub max_retries: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            default_batch_size: default_eval_batch(),
            max_ids: default_max_ids(),
            min_id_len: default_min_id_len(),
            trend_window_days: default_trend_window(),
            trend_epsilon: default_trend_epsilon(),
            relevance_threshold: default_relevance_threshold(),
            recall_context_fallback: true,
            timeout_secs: default_eval_timeout(),
            max_retries: default_eval_retries(),
        }
    }
}

fn default_eval_batch() -> usize {
    50
}
fn default_max_ids() -> usize {
    100
}
fn default_min_id_len() -> usize {
    10
}
fn default_trend_window() -> i64 {
    30
}
fn default_trend_epsilon() -> f64 {
    0.05
}
fn default_relevance_threshold() -> f64 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_eval_timeout() -> u64 {
    120
}
fn default_eval_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// A configuration with every collaborator disabled, rooted at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Config {
            db: DbConfig {
                path: db_path.into(),
            },
            logging: LoggingConfig::default(),
            chunking: ChunkingConfig::default(),
            filter: FilterConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            generation: GenerationConfig::default(),
            evaluation: EvaluationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Filter
    match config.filter.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.filter.url.is_none() {
                anyhow::bail!("filter.url must be set when filter.provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown filter provider: '{}'. Must be disabled or http.",
            other
        ),
    }
    if config.filter.threshold.is_nan() || config.filter.threshold <= 0.0 {
        anyhow::bail!("filter.threshold must be a positive number");
    }

    // Retrieval
    if config.retrieval.overfetch_factor == 0 || config.retrieval.max_candidates == 0 {
        anyhow::bail!("retrieval.overfetch_factor and retrieval.max_candidates must be >= 1");
    }

    // Embedding
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.rerank.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown rerank provider: '{}'. Must be disabled or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    // Evaluation
    match config.evaluation.provider.as_str() {
        "disabled" => {}
        "llm-judge" => {
            if config.generation.provider == "disabled" {
                anyhow::bail!(
                    "evaluation.provider 'llm-judge' requires generation.provider to be set"
                );
            }
        }
        "http" => {
            if config.evaluation.url.is_none() {
                anyhow::bail!("evaluation.url must be set when evaluation.provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown evaluation provider: '{}'. Must be disabled, llm-judge, or http.",
            other
        ),
    }
    if config.evaluation.trend_window_days < 1 {
        anyhow::bail!("evaluation.trend_window_days must be >= 1");
    }
    if config.evaluation.default_batch_size == 0 || config.evaluation.max_ids == 0 {
        anyhow::bail!("evaluation.default_batch_size and evaluation.max_ids must be >= 1");
    }

    Ok(())
}
