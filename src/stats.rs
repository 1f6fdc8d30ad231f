//! Index and interaction log overview for `ragq stats`.
//!
//! Prints what is indexed, how many answers have been recorded, and how
//! much of that log has been evaluated or rated.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::pipeline::Services;

/// Print a summary of the database behind `services`.
pub async fn run_stats(config: &Config, services: &Services) -> Result<()> {
    let entries = services.index.entries().await?;
    let overview = services.evaluation.stats_overview().await?;

    let mut by_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut documents: BTreeSet<(&str, &str)> = BTreeSet::new();
    for entry in &entries {
        let slot = by_category
            .entry(entry.metadata.category.as_str())
            .or_default();
        slot.1 += 1;
        if documents.insert((
            entry.metadata.category.as_str(),
            entry.metadata.title.as_str(),
        )) {
            slot.0 += 1;
        }
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("ragq database stats");
    println!("===================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Embedder:      {}", services.embedder.model_name());
    println!();
    println!("  Documents:     {}", documents.len());
    println!("  Chunks:        {}", entries.len());

    if !by_category.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<28} {:>6} {:>8}", "CATEGORY", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(44));
        for (category, (docs, chunks)) in &by_category {
            println!("  {:<28} {:>6} {:>8}", category, docs, chunks);
        }
    }

    println!();
    println!("  Interactions:  {}", overview.total_interactions);
    println!(
        "  Evaluated:     {} ({:.1}%)",
        overview.scored_interactions, overview.evaluation_coverage_pct
    );
    println!(
        "  Rated:         {} ({:.1}%)",
        overview.interactions_with_feedback, overview.feedback_coverage_pct
    );
    if let Some(t) = overview.average_response_time {
        println!("  Avg response:  {:.2}s", t);
    }
    if let Some(r) = overview.average_user_rating {
        println!("  Avg rating:    {:.2} / 5", r);
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
