//! # rag-quality CLI (`ragq`)
//!
//! The `ragq` binary drives the whole pipeline: database setup, document
//! ingestion, search, question answering, feedback, evaluation, reporting
//! and the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! ragq --config ./config/ragq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragq init` | Create the SQLite database and run schema migrations |
//! | `ragq ingest <dir>` | Filter, chunk, embed and index a directory of `.txt` files |
//! | `ragq add <file>` | Index one file under an explicit title and category |
//! | `ragq get <id>` | Show one indexed chunk |
//! | `ragq reset --yes` | Empty the index |
//! | `ragq search "<query>"` | Ranked passages with a quality summary |
//! | `ragq ask "<question>"` | Answer a question and record the interaction |
//! | `ragq feedback <id> <rating>` | Rate a recorded answer 1–5 |
//! | `ragq evaluate` | Score a batch of interactions |
//! | `ragq report` | Score statistics for the last N days |
//! | `ragq interactions` | Page through the interaction log |
//! | `ragq stats` | Index and log overview |
//! | `ragq export ...` | Export vectors (TSV) or interactions (JSON) |
//! | `ragq serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rag_quality::config::{self, Config};
use rag_quality::pipeline::{NewDocument, Services};
use rag_quality::{db, export, logging, migrate, server, stats};

/// rag-quality CLI: retrieval-augmented answers with continuous quality
/// evaluation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragq",
    about = "Retrieval-augmented question answering with noise filtering, reranking and quality evaluation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `chunks` and `interactions`
    /// tables. Safe to run repeatedly.
    Init,

    /// Load every eligible file under a directory into the index.
    ///
    /// Files are cleaned sentence by sentence, split into overlapping
    /// chunks, embedded and upserted. Re-ingesting the same directory
    /// replaces chunks in place.
    Ingest {
        /// Directory to scan.
        dir: PathBuf,

        /// Report document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Index a single file under an explicit title and category.
    ///
    /// Any earlier version of the same document is replaced.
    Add {
        /// File whose contents become the document body.
        file: PathBuf,

        /// Defaults to the file stem.
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        category: Option<String>,
    },

    /// Show one indexed chunk by id.
    Get { id: String },

    /// Remove every indexed chunk. Recorded interactions are kept.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Search indexed chunks.
    Search {
        query: String,

        /// Maximum number of results (1–50).
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to one category.
        #[arg(long)]
        category: Option<String>,
    },

    /// Answer a question from indexed documents.
    Ask {
        question: String,

        /// Maximum number of passages used as context (1–20).
        #[arg(long)]
        max_documents: Option<usize>,

        #[arg(long)]
        category: Option<String>,
    },

    /// Rate a recorded answer.
    Feedback {
        /// Interaction id printed by `ragq ask`.
        id: String,

        /// Integer rating from 1 to 5.
        #[arg(allow_negative_numbers = true)]
        rating: i64,
    },

    /// Score interactions with the configured evaluator.
    ///
    /// Without `--id`, evaluates the most recent `--limit` interactions.
    Evaluate {
        /// Interaction id to evaluate. Repeatable.
        #[arg(long = "id")]
        ids: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Skip the comparison against recent history.
        #[arg(long)]
        no_trends: bool,
    },

    /// Score statistics over interactions evaluated in the last N days.
    Report {
        /// Window in days. Defaults to `[evaluation].trend_window_days`.
        #[arg(long)]
        days: Option<i64>,
    },

    /// Page through recorded interactions, newest first.
    Interactions {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Only list interactions that have quality scores.
        #[arg(long)]
        scored_only: bool,
    },

    /// Show index and interaction log statistics.
    Stats,

    /// Export data for external tools.
    Export {
        #[command(subcommand)]
        target: ExportTarget,
    },

    /// Start the HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ExportTarget {
    /// Write `vectors.tsv` and `metadata.tsv` for an embedding projector.
    Embeddings {
        /// Output directory.
        dir: PathBuf,
    },
    /// Dump the interaction log as JSON.
    Interactions {
        /// Output file. Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

async fn open_services(cfg: &Config) -> anyhow::Result<Services> {
    let pool = db::connect(cfg).await?;
    Services::from_config(cfg, pool)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir, dry_run } => {
            let services = open_services(&cfg).await?;
            let report = services.load_documents(&dir, dry_run).await?;
            for doc in &report.details {
                match &doc.error {
                    Some(e) => println!("  FAILED   {} [{}]: {}", doc.title, doc.category, e),
                    None => println!(
                        "  {:<8} {} [{}] {} chunks",
                        if dry_run { "PLANNED" } else { "OK" },
                        doc.title,
                        doc.category,
                        doc.chunks_created
                    ),
                }
            }
            println!();
            println!(
                "{} documents ({} ok, {} failed), {} chunks, {:.1} per document{}",
                report.total_documents,
                report.successful_documents,
                report.failed_documents,
                report.total_chunks,
                report.average_chunks_per_document,
                if dry_run { " (dry run)" } else { "" }
            );
        }
        Commands::Add {
            file,
            title,
            category,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let title = title.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            });
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("source_file".to_string(), file.display().to_string());

            let services = open_services(&cfg).await?;
            let added = services
                .add_document(NewDocument {
                    title,
                    category,
                    content,
                    metadata,
                })
                .await?;
            println!(
                "{} [{}]: {} chunks, {} sentences rejected",
                added.title,
                added.category,
                added.chunk_ids.len(),
                added.sentences_rejected
            );
            for id in &added.chunk_ids {
                println!("  {}", id);
            }
        }
        Commands::Get { id } => {
            let services = open_services(&cfg).await?;
            let chunk = services.get_chunk(&id).await?;
            println!("id:        {}", chunk.id);
            println!("title:     {}", chunk.title);
            println!("category:  {}", chunk.category);
            println!("chunk:     {}/{}", chunk.chunk_index + 1, chunk.total_chunks);
            for (key, value) in &chunk.metadata {
                println!("{:<10} {}", format!("{}:", key), value);
            }
            println!();
            println!("{}", chunk.content);
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset deletes every indexed chunk; pass --yes to confirm");
            }
            let services = open_services(&cfg).await?;
            let removed = services.reset_index().await?;
            println!("Removed {} chunks.", removed);
        }
        Commands::Search {
            query,
            limit,
            category,
        } => {
            let services = open_services(&cfg).await?;
            let response = services
                .pipeline
                .search(&query, limit, category.as_deref())
                .await?;
            if response.results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in response.results.iter().enumerate() {
                println!(
                    "{}. {} [{}]  similarity={:.3} rerank={:.3}",
                    i + 1,
                    hit.title,
                    hit.category,
                    hit.coarse_similarity,
                    hit.rerank_score
                );
                let preview: String = hit.content.chars().take(160).collect();
                println!("   {}", preview.replace('\n', " "));
            }
            if !response.results.is_empty() {
                println!();
                println!(
                    "Quality: {:?} (avg similarity {:.3}, {} categories)",
                    response.quality.grade,
                    response.quality.average_similarity,
                    response.quality.category_distribution.len()
                );
            }
        }
        Commands::Ask {
            question,
            max_documents,
            category,
        } => {
            let services = open_services(&cfg).await?;
            let response = services
                .pipeline
                .ask(&question, max_documents, category.as_deref())
                .await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    println!(
                        "  [{}] {} ({}) {:.3}",
                        source.index, source.title, source.category, source.similarity
                    );
                }
            }
            println!();
            println!(
                "interaction {} in {:.2}s",
                response.interaction_id, response.response_time
            );
        }
        Commands::Feedback { id, rating } => {
            let services = open_services(&cfg).await?;
            services.pipeline.submit_feedback(&id, rating).await?;
            println!("Feedback recorded for {}.", id);
        }
        Commands::Evaluate {
            ids,
            limit,
            no_trends,
        } => {
            let services = open_services(&cfg).await?;
            let ids = if ids.is_empty() { None } else { Some(ids) };
            let report = services.evaluation.evaluate(ids, limit, !no_trends).await?;
            print_json(&report)?;
        }
        Commands::Report { days } => {
            let services = open_services(&cfg).await?;
            print_json(&services.evaluation.quality_report(days).await?)?;
        }
        Commands::Interactions {
            limit,
            offset,
            scored_only,
        } => {
            let services = open_services(&cfg).await?;
            let page = services
                .evaluation
                .list_interactions(limit, offset, scored_only)
                .await?;
            println!(
                "{:<38} {:<17} {:>6} {:>6}  QUESTION",
                "ID", "TIMESTAMP", "RATING", "SCORE"
            );
            for item in &page.items {
                let score = item
                    .quality_scores
                    .as_ref()
                    .and_then(|s| s.mean())
                    .map(|m| format!("{:.2}", m))
                    .unwrap_or_else(|| "-".to_string());
                let rating = item
                    .user_feedback
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let question: String = item.question.chars().take(60).collect();
                println!(
                    "{:<38} {:<17} {:>6} {:>6}  {}",
                    item.id,
                    item.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    rating,
                    score,
                    question
                );
            }
            println!();
            println!(
                "{} of {} shown{}",
                page.items.len(),
                page.total,
                if page.has_more { ", more available" } else { "" }
            );
        }
        Commands::Stats => {
            let services = open_services(&cfg).await?;
            stats::run_stats(&cfg, &services).await?;
        }
        Commands::Export { target } => {
            let services = open_services(&cfg).await?;
            match target {
                ExportTarget::Embeddings { dir } => {
                    export::export_embeddings(services.index.as_ref(), &dir).await?;
                }
                ExportTarget::Interactions { output } => {
                    export::export_interactions(services.interactions.as_ref(), output.as_deref())
                        .await?;
                }
            }
        }
        Commands::Serve => {
            let services = open_services(&cfg).await?;
            server::run_server(services, &cfg.server.bind).await?;
        }
    }

    Ok(())
}
