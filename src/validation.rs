//! Request validation shared by the CLI and the HTTP boundary.
//!
//! Lengths are measured in characters after trimming surrounding
//! whitespace. Every failure is a [`PipelineError::Validation`] naming the
//! offending field.

use crate::error::{PipelineError, Result};

pub const QUESTION_CHARS: (usize, usize) = (3, 2000);
pub const MAX_DOCUMENTS: (usize, usize) = (1, 20);
pub const QUERY_CHARS: (usize, usize) = (2, 1000);
pub const SEARCH_LIMIT: (usize, usize) = (1, 50);
pub const RATING: (u8, u8) = (1, 5);
pub const TITLE_CHARS: (usize, usize) = (1, 200);
pub const CONTENT_CHARS: (usize, usize) = (1, 200_000);

fn text_in_range(field: &'static str, value: &str, (min, max): (usize, usize)) -> Result<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(PipelineError::validation(
            field,
            format!("must be at least {} characters", min),
        ));
    }
    if len > max {
        return Err(PipelineError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(trimmed.to_string())
}

fn number_in_range(field: &'static str, value: usize, (min, max): (usize, usize)) -> Result<usize> {
    if value < min || value > max {
        return Err(PipelineError::validation(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(value)
}

/// Trimmed question text.
pub fn question(value: &str) -> Result<String> {
    text_in_range("question", value, QUESTION_CHARS)
}

pub fn max_documents(value: usize) -> Result<usize> {
    number_in_range("max_documents", value, MAX_DOCUMENTS)
}

/// Trimmed search query.
pub fn query(value: &str) -> Result<String> {
    text_in_range("query", value, QUERY_CHARS)
}

pub fn limit(value: usize) -> Result<usize> {
    number_in_range("limit", value, SEARCH_LIMIT)
}

pub fn title(value: &str) -> Result<String> {
    text_in_range("title", value, TITLE_CHARS)
}

/// Body of a document added directly rather than read from disk.
pub fn content(value: &str) -> Result<String> {
    text_in_range("content", value, CONTENT_CHARS)
}

/// `None` and blank strings both mean "no filter".
pub fn category(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn rating(value: i64) -> Result<u8> {
    let (min, max) = RATING;
    if value < min as i64 || value > max as i64 {
        return Err(PipelineError::validation(
            "rating",
            format!("must be an integer between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(value as u8)
}

/// Explicit interaction id list for an evaluation run.
pub fn interaction_ids(ids: &[String], max_ids: usize, min_len: usize) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Err(PipelineError::validation("interaction_ids", "must not be empty"));
    }
    if ids.len() > max_ids {
        return Err(PipelineError::validation(
            "interaction_ids",
            format!("at most {} ids per request, got {}", max_ids, ids.len()),
        ));
    }
    ids.iter()
        .map(|id| {
            let id = id.trim();
            if id.chars().count() < min_len {
                Err(PipelineError::validation(
                    "interaction_ids",
                    format!("id '{}' is shorter than {} characters", id, min_len),
                ))
            } else {
                Ok(id.to_string())
            }
        })
        .collect()
}
