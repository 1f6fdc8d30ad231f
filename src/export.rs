//! Export indexed vectors and recorded interactions.
//!
//! `ragq export embeddings <dir>` writes `vectors.tsv` and `metadata.tsv`
//! in the layout embedding projectors load directly: one row per chunk,
//! same order in both files, metadata with a header row.
//!
//! `ragq export interactions` dumps the interaction log as JSON.

use anyhow::Result;
use std::path::Path;

use crate::interactions::InteractionStore;
use crate::store::{IndexEntry, VectorIndex};

/// One tab-separated vector per line.
pub fn vectors_tsv(entries: &[IndexEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let row: Vec<String> = entry.vector.iter().map(|v| v.to_string()).collect();
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

/// Title, category and chunk position for each vector, with a header.
pub fn metadata_tsv(entries: &[IndexEntry]) -> String {
    let mut out = String::from("title\tcategory\tchunk\n");
    for entry in entries {
        out.push_str(&format!(
            "{}\t{}\t{}/{}\n",
            tsv_field(&entry.metadata.title),
            tsv_field(&entry.metadata.category),
            entry.metadata.chunk_index + 1,
            entry.metadata.total_chunks
        ));
    }
    out
}

fn tsv_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Write both TSV files into `dir`, creating it if needed.
pub async fn export_embeddings(index: &dyn VectorIndex, dir: &Path) -> Result<usize> {
    let entries = index.entries().await?;
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("vectors.tsv"), vectors_tsv(&entries))?;
    std::fs::write(dir.join("metadata.tsv"), metadata_tsv(&entries))?;
    eprintln!(
        "Exported {} vectors to {}",
        entries.len(),
        dir.display()
    );
    Ok(entries.len())
}

/// Write every interaction, newest first, as pretty JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn export_interactions(
    store: &dyn InteractionStore,
    output: Option<&Path>,
) -> Result<usize> {
    let total = store.count(false).await?;
    let interactions = store.list(total.max(1), 0, false).await?;
    let json = serde_json::to_string_pretty(&interactions)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} interactions to {}",
                interactions.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(interactions.len())
}
