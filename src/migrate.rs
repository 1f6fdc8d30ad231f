use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Indexed chunks with their vectors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            parent_title TEXT NOT NULL,
            content TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Recorded question/answer exchanges
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interactions (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            contexts_json TEXT NOT NULL DEFAULT '[]',
            sources_json TEXT NOT NULL DEFAULT '[]',
            response_time REAL NOT NULL,
            user_feedback INTEGER,
            quality_scores_json TEXT,
            model_version TEXT NOT NULL,
            embedding_model TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_category ON chunks(category)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
