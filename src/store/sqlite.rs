//! SQLite-backed [`VectorIndex`] over the `chunks` table.
//!
//! Vectors are little-endian `f32` BLOBs (see
//! [`vec_to_blob`](crate::embedding::vec_to_blob)). A batch upsert runs in
//! one transaction, as does a document replacement (delete then insert),
//! which is what gives ingestion its per-file atomicity.

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;

use super::{nearest, IndexEntry, IndexHit, VectorIndex};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Lookup, PipelineError, Result};
use crate::models::ChunkMetadata;

const SELECT_COLUMNS: &str = "SELECT id, category, parent_title, content, chunk_index, \
     total_chunks, metadata_json, embedding FROM chunks";

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Decodable rows, ordered by id. A row whose metadata cannot be read
    /// is logged and left out so one bad record does not blind every query.
    async fn load(&self, category: Option<&str>) -> Result<Vec<IndexEntry>> {
        let rows = match category {
            Some(c) => {
                sqlx::query(&format!("{} WHERE category = ? ORDER BY id", SELECT_COLUMNS))
                    .bind(c)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY id", SELECT_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows
            .iter()
            .filter_map(|row| match row_to_entry(row) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable chunk");
                    None
                }
            })
            .collect())
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let source: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| PipelineError::DataIntegrity(format!("chunk {}: metadata: {}", id, e)))?;
    let blob: Vec<u8> = row.get("embedding");

    Ok(IndexEntry {
        metadata: ChunkMetadata {
            title: row.get("parent_title"),
            category: row.get("category"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            total_chunks: row.get::<i64, _>("total_chunks") as usize,
            source,
        },
        vector: blob_to_vec(&blob),
        text: row.get("content"),
        id,
    })
}

async fn write_entry(conn: &mut SqliteConnection, entry: &IndexEntry, now: i64) -> Result<()> {
    let metadata_json = serde_json::to_string(&entry.metadata.source)
        .map_err(|e| PipelineError::Internal(e.into()))?;

    sqlx::query(
        r#"
        INSERT INTO chunks (id, category, parent_title, content, chunk_index,
                            total_chunks, metadata_json, embedding, dims, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            category = excluded.category,
            parent_title = excluded.parent_title,
            content = excluded.content,
            chunk_index = excluded.chunk_index,
            total_chunks = excluded.total_chunks,
            metadata_json = excluded.metadata_json,
            embedding = excluded.embedding,
            dims = excluded.dims,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.metadata.category)
    .bind(&entry.metadata.title)
    .bind(&entry.text)
    .bind(entry.metadata.chunk_index as i64)
    .bind(entry.metadata.total_chunks as i64)
    .bind(&metadata_json)
    .bind(vec_to_blob(&entry.vector))
    .bind(entry.vector.len() as i64)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            write_entry(&mut *tx, entry, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_document(
        &self,
        title: &str,
        category: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunks WHERE parent_title = ? AND category = ?")
            .bind(title)
            .bind(category)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for entry in &entries {
            write_entry(&mut *tx, entry, now).await?;
        }

        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn get(&self, id: &str) -> Result<Lookup<IndexEntry>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_entry).transpose()?.into())
    }

    async fn clear(&self) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM chunks")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed as usize)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let entries = self.load(category).await?;
        Ok(nearest(vector, k, &entries))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>> {
        self.load(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn index() -> (TempDir, SqliteIndex) {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("rag.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, SqliteIndex::new(pool))
    }

    fn entry(id: &str, category: &str, vector: Vec<f32>) -> IndexEntry {
        let mut source = BTreeMap::new();
        source.insert("file_name".to_string(), format!("{}.txt", id));
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: ChunkMetadata {
                title: format!("Title {}", id),
                category: category.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                source,
            },
            text: format!("content {}", id),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_query_roundtrip() {
        let (_tmp, index) = index().await;
        index
            .upsert(vec![
                entry("finance_1", "finance", vec![1.0, 0.0, 0.0]),
                entry("hr_1", "hr", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[0.9, 0.1, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "finance_1");
        assert_eq!(hits[0].metadata.title, "Title finance_1");
        assert_eq!(
            hits[0].metadata.source.get("file_name").map(String::as_str),
            Some("finance_1.txt")
        );

        let hr_only = index.query(&[1.0, 0.0, 0.0], 5, Some("hr")).await.unwrap();
        assert_eq!(hr_only.len(), 1);
        assert_eq!(hr_only[0].id, "hr_1");
    }

    #[tokio::test]
    async fn test_reupsert_does_not_duplicate() {
        let (_tmp, index) = index().await;
        let e = entry("finance_1", "finance", vec![1.0, 0.0]);
        index.upsert(vec![e.clone()]).await.unwrap();
        index.upsert(vec![e]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_document_removes_previous_version() {
        let (_tmp, index) = index().await;
        let mut old = entry("finance_old", "finance", vec![1.0, 0.0]);
        old.metadata.title = "Credit".into();
        let mut unrelated = entry("finance_other", "finance", vec![0.0, 1.0]);
        unrelated.metadata.title = "Debit".into();
        index.upsert(vec![old, unrelated]).await.unwrap();

        let mut new = entry("finance_new", "finance", vec![1.0, 0.1]);
        new.metadata.title = "Credit".into();
        new.text = "The credit limit is 5000 dollars.".into();
        let removed = index
            .replace_document("Credit", "finance", vec![new])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let ids: Vec<_> = index.entries().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["finance_new", "finance_other"]);
    }

    #[tokio::test]
    async fn test_get_and_clear() {
        let (_tmp, index) = index().await;
        index
            .upsert(vec![entry("hr_1", "hr", vec![1.0, 0.0])])
            .await
            .unwrap();

        let found = index.get("hr_1").await.unwrap().found().unwrap();
        assert_eq!(found.text, "content hr_1");
        assert!(index.get("hr_2").await.unwrap().is_empty());

        assert_eq!(index.clear().await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_row_is_skipped_by_queries() {
        let (_tmp, index) = index().await;
        index
            .upsert(vec![
                entry("finance_1", "finance", vec![1.0, 0.0]),
                entry("finance_2", "finance", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();
        sqlx::query("UPDATE chunks SET metadata_json = 'not json' WHERE id = 'finance_1'")
            .execute(&index.pool)
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "finance_2");
        assert_eq!(
            index.get("finance_1").await.unwrap_err().code(),
            "data_integrity_error"
        );
    }
}
