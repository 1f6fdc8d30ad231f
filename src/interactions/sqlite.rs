//! SQLite-backed [`InteractionStore`] over the `interactions` table.
//!
//! Timestamps are stored as Unix milliseconds. JSON columns hold the
//! contexts, sources and quality scores; feedback and scores are updated
//! with single-column `UPDATE`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{normalize_scores, InteractionStore, InteractionSummary};
use crate::error::{Lookup, PipelineError, Result};
use crate::models::{Interaction, QualityScores};

const SELECT_COLUMNS: &str = "SELECT id, timestamp, question, answer, contexts_json, \
     sources_json, response_time, user_feedback, quality_scores_json, model_version, \
     embedding_model FROM interactions";

pub struct SqliteInteractions {
    pool: SqlitePool,
}

impl SqliteInteractions {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PipelineError::Internal(e.into()))
}

/// Decode a JSON column, logging and falling back to `T::default()` when
/// the stored text is corrupt.
fn decode_or_default<T: DeserializeOwned + Default>(id: &str, column: &str, raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        let err = PipelineError::DataIntegrity(format!("interaction {}: {}: {}", id, column, e));
        tracing::warn!(error = %err, "ignoring corrupt column");
        T::default()
    })
}

fn decode_scores(id: &str, raw: Option<String>) -> Option<QualityScores> {
    let raw = raw?;
    match serde_json::from_str::<QualityScores>(&raw) {
        Ok(scores) => normalize_scores(Some(scores)),
        Err(e) => {
            let err = PipelineError::DataIntegrity(format!(
                "interaction {}: quality_scores: {}",
                id, e
            ));
            tracing::warn!(error = %err, "treating interaction as unscored");
            None
        }
    }
}

fn row_to_interaction(row: &SqliteRow) -> Interaction {
    let id: String = row.get("id");
    let millis: i64 = row.get("timestamp");
    let contexts_json: String = row.get("contexts_json");
    let sources_json: String = row.get("sources_json");
    let feedback: Option<i64> = row.get("user_feedback");

    Interaction {
        timestamp: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
        question: row.get("question"),
        answer: row.get("answer"),
        contexts: decode_or_default(&id, "contexts", &contexts_json),
        sources: decode_or_default(&id, "sources", &sources_json),
        response_time: row.get("response_time"),
        user_feedback: feedback.and_then(|r| u8::try_from(r).ok()),
        quality_scores: decode_scores(&id, row.get("quality_scores_json")),
        model_version: row.get("model_version"),
        embedding_model: row.get("embedding_model"),
        id,
    }
}

#[async_trait]
impl InteractionStore for SqliteInteractions {
    async fn insert(&self, interaction: &Interaction) -> Result<()> {
        let scores = normalize_scores(interaction.quality_scores)
            .map(|s| to_json(&s))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO interactions (id, timestamp, question, answer, contexts_json,
                                      sources_json, response_time, user_feedback,
                                      quality_scores_json, model_version, embedding_model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&interaction.id)
        .bind(interaction.timestamp.timestamp_millis())
        .bind(&interaction.question)
        .bind(&interaction.answer)
        .bind(to_json(&interaction.contexts)?)
        .bind(to_json(&interaction.sources)?)
        .bind(interaction.response_time)
        .bind(interaction.user_feedback.map(i64::from))
        .bind(scores)
        .bind(&interaction.model_version)
        .bind(&interaction.embedding_model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Lookup<Interaction>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_interaction).into())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Interaction>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{} WHERE id IN ({}) ORDER BY timestamp DESC, id",
            SELECT_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_interaction).collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Interaction>> {
        self.list(limit, 0, false).await
    }

    async fn recent_scored(&self, limit: usize) -> Result<Vec<Interaction>> {
        let mut out = self.list(limit, 0, true).await?;
        // Rows whose stored scores failed to decode come back unscored.
        out.retain(|i| i.quality_scores.is_some());
        Ok(out)
    }

    async fn scored_since(&self, since: DateTime<Utc>) -> Result<Vec<Interaction>> {
        let rows = sqlx::query(&format!(
            "{} WHERE quality_scores_json IS NOT NULL AND timestamp >= ? \
             ORDER BY timestamp DESC, id",
            SELECT_COLUMNS
        ))
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_interaction)
            .filter(|i| i.quality_scores.is_some())
            .collect())
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        scored_only: bool,
    ) -> Result<Vec<Interaction>> {
        let filter = if scored_only {
            "WHERE quality_scores_json IS NOT NULL"
        } else {
            ""
        };
        let rows = sqlx::query(&format!(
            "{} {} ORDER BY timestamp DESC, id LIMIT ? OFFSET ?",
            SELECT_COLUMNS, filter
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_interaction).collect())
    }

    async fn count(&self, scored_only: bool) -> Result<usize> {
        let sql = if scored_only {
            "SELECT COUNT(*) FROM interactions WHERE quality_scores_json IS NOT NULL"
        } else {
            "SELECT COUNT(*) FROM interactions"
        };
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count as usize)
    }

    async fn summary(&self) -> Result<InteractionSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COUNT(user_feedback) AS with_feedback, \
                    AVG(response_time) AS avg_response_time, \
                    AVG(user_feedback) AS avg_rating \
             FROM interactions",
        )
        .fetch_one(&self.pool)
        .await?;

        let scored_rows = sqlx::query(
            "SELECT id, quality_scores_json FROM interactions \
             WHERE quality_scores_json IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        let scored = scored_rows
            .iter()
            .filter(|r| {
                let id: String = r.get("id");
                decode_scores(&id, r.get("quality_scores_json")).is_some()
            })
            .count();

        Ok(InteractionSummary {
            total: row.get::<i64, _>("total") as usize,
            scored,
            with_feedback: row.get::<i64, _>("with_feedback") as usize,
            avg_response_time: row.get("avg_response_time"),
            avg_rating: row.get("avg_rating"),
        })
    }

    async fn set_quality_scores(&self, id: &str, scores: &QualityScores) -> Result<bool> {
        let json = normalize_scores(Some(*scores))
            .map(|s| to_json(&s))
            .transpose()?;
        let result = sqlx::query("UPDATE interactions SET quality_scores_json = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_feedback(&self, id: &str, rating: u8) -> Result<bool> {
        let result = sqlx::query("UPDATE interactions SET user_feedback = ? WHERE id = ?")
            .bind(i64::from(rating))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
