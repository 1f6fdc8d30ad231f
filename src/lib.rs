//! # rag-quality
//!
//! A retrieval-augmented question answering pipeline that filters noisy
//! sentences before indexing, reranks what it retrieves, and keeps
//! scoring the answers it gives.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐   ┌─────────────┐
//! │ Directory  │──▶│ Sentence     │──▶│ Chunk +  │──▶│ VectorIndex │
//! │ of .txt    │   │ filter       │   │ embed    │   │  (SQLite)   │
//! └────────────┘   └──────────────┘   └──────────┘   └──────┬──────┘
//!                                                           │
//!        question ──▶ embed ──▶ coarse top-k ──▶ rerank ────┤
//!                                                           ▼
//!                 ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//!                 │ Evaluation   │◀──│ Interactions │◀──│ Answer   │
//!                 │ engine       │   │  (SQLite)    │   │ composer │
//!                 └──────────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragq init                          # create database
//! ragq ingest ./docs                 # filter, chunk, embed, index
//! ragq ask "How are refunds handled?"
//! ragq evaluate --limit 20           # score recent answers
//! ragq report --days 7
//! ragq serve                         # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`filter`] | Sentence-level noise filtering |
//! | [`chunk`] | Overlapping text chunking |
//! | [`ingest`] | Directory loading and indexing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index backends |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`retrieval`] | Two-stage search |
//! | [`generation`] | Chat completion backends |
//! | [`answer`] | Grounded answer composition |
//! | [`interactions`] | Interaction persistence |
//! | [`evaluation`] | Scoring, aggregation, trends |
//! | [`pipeline`] | Orchestration and service wiring |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod filter;
pub mod generation;
pub mod ingest;
pub mod interactions;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod stats;
pub mod store;
pub mod validation;
