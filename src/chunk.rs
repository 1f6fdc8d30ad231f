//! Recursive separator chunker.
//!
//! Splits cleaned document text into [`Chunk`]s no longer than
//! `max_chars` characters, preferring paragraph boundaries, then line
//! boundaries, then whitespace, and only cutting mid-word when a piece has
//! no separator at all. Consecutive chunks share up to `overlap_chars`
//! characters so a fact spanning a boundary survives in at least one chunk.
//!
//! Lengths are counted in `char`s, never bytes. Output is a pure function
//! of the input, which keeps chunk ids stable across re-ingestion.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, CleanDocument};

/// Separator hierarchy, most to least meaningful. The empty string means
/// "split between characters".
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Hex digits of the content hash kept in chunk ids.
const ID_HASH_LEN: usize = 16;

/// Split `text` into overlapping pieces of at most `max_size` characters.
///
/// Every returned piece is trimmed and non-empty. An `overlap` greater
/// than or equal to `max_size` is clamped so the splitter always makes
/// progress.
pub fn split(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let max_size = max_size.max(1);
    let overlap = overlap.min(max_size.saturating_sub(1));
    split_recursive(text, &SEPARATORS, max_size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], max_size: usize, overlap: usize) -> Vec<String> {
    // Pick the first separator that occurs in the text; "" always matches.
    let mut separator = "";
    let mut remaining: &[&str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            separator = sep;
            remaining = &separators[i + 1..];
            break;
        }
    }

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<String> = Vec::new();

    for piece in pieces {
        if char_len(&piece) < max_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge(&fitting, separator, max_size, overlap));
            fitting.clear();
        }
        if remaining.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            out.extend(split_recursive(&piece, remaining, max_size, overlap));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge(&fitting, separator, max_size, overlap));
    }

    out
}

/// Greedily pack `pieces` into windows of at most `max_size` characters,
/// carrying the tail of each window (up to `overlap` characters) into the
/// next one.
fn merge(pieces: &[String], separator: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut out = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joined_len = |window: &VecDeque<&str>, total: usize| {
            total + len + if window.is_empty() { 0 } else { sep_len }
        };

        if joined_len(&window, total) > max_size && !window.is_empty() {
            push_joined(&mut out, &window, separator);

            while total > overlap || (total > 0 && joined_len(&window, total) > max_size) {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
            }
        }

        window.push_back(piece);
        total += len + if window.len() > 1 { sep_len } else { 0 };
    }

    push_joined(&mut out, &window, separator);
    out
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunk a cleaned document into indexable [`Chunk`]s.
///
/// Ids are derived from the category and a SHA-256 of title + content, so
/// re-ingesting unchanged text overwrites the same index entries instead of
/// adding duplicates.
pub fn chunk_document(doc: &CleanDocument, config: &ChunkingConfig) -> Vec<Chunk> {
    let pieces = split(&doc.body_text, config.max_chars, config.overlap_chars);
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            id: chunk_id(&doc.category, &doc.title, &content),
            parent_title: doc.title.clone(),
            category: doc.category.clone(),
            content,
            chunk_index: index,
            total_chunks: total,
            source_metadata: doc.source_metadata.clone(),
        })
        .collect()
}

pub fn chunk_id(category: &str, title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(content.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", category, &digest[..ID_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityTrace;
    use std::collections::BTreeMap;

    fn doc(title: &str, category: &str, body: &str) -> CleanDocument {
        CleanDocument {
            title: title.to_string(),
            category: category.to_string(),
            body_text: body.to_string(),
            source_metadata: BTreeMap::new(),
            quality_trace: QualityTrace::default(),
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        assert_eq!(split("Hello, world!", 500, 50), vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split("", 500, 50).is_empty());
        assert!(split("   \n\n  ", 500, 50).is_empty());
    }

    #[test]
    fn test_word_windows_overlap() {
        let chunks = split("aaaa bbbb cccc dddd eeee", 10, 5);
        assert_eq!(
            chunks,
            vec!["aaaa bbbb", "bbbb cccc", "cccc dddd", "dddd eeee"]
        );
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let chunks = split("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let para_a = "First paragraph talks about credit limits.";
        let para_b = "Second paragraph covers payment schedules.";
        let text = format!("{}\n\n{}", para_a, para_b);
        let chunks = split(&text, 50, 0);
        assert_eq!(chunks, vec![para_a, para_b]);
    }

    #[test]
    fn test_size_invariant_holds() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(60)
            + "\n\n"
            + &"Lorem ipsum dolor sit amet consectetur. ".repeat(40);
        for (max, overlap) in [(500, 50), (120, 30), (37, 5), (8, 2)] {
            let chunks = split(&text, max, overlap);
            assert!(chunks.len() > 1);
            for chunk in &chunks {
                assert!(
                    chunk.chars().count() <= max,
                    "chunk of {} chars exceeds {}",
                    chunk.chars().count(),
                    max
                );
            }
        }
    }

    #[test]
    fn test_multibyte_text_is_char_safe() {
        let text = "ação é êxito ".repeat(40);
        let chunks = split(&text, 25, 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 25);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "One. Two three four.\nFive six seven.\n\nEight nine ten eleven twelve.";
        assert_eq!(split(text, 15, 4), split(text, 15, 4));
    }

    #[test]
    fn test_chunk_document_indices_and_ids() {
        let d = doc("Credit Policy", "finance", &"Limits apply to every account. ".repeat(40));
        let config = ChunkingConfig {
            max_chars: 200,
            overlap_chars: 20,
        };
        let chunks = chunk_document(&d, &config);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, chunks.len());
            assert!(c.id.starts_with("finance_"));
            assert_eq!(c.parent_title, "Credit Policy");
        }

        let again = chunk_document(&d, &config);
        let ids: Vec<_> = chunks.iter().map(|c| c.id.clone()).collect();
        let ids_again: Vec<_> = again.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_chunk_id_depends_on_title() {
        assert_ne!(
            chunk_id("hr", "Vacation", "Same text"),
            chunk_id("hr", "Leave", "Same text")
        );
        assert_eq!(chunk_id("hr", "Vacation", "x").len(), "hr_".len() + ID_HASH_LEN);
    }
}
