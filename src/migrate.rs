//! Table bootstrapping for the local SQLite store.
//!
//! Every statement is `IF NOT EXISTS`, so `learnflow init` is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_tables(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            session_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            summary TEXT,
            authors TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES learning_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Readable content, fetched or supplied once per article
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_content (
            article_id INTEGER PRIMARY KEY,
            markdown TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            FOREIGN KEY (article_id) REFERENCES articles(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            goal TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            article_id INTEGER NOT NULL,
            note TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (article_id) REFERENCES articles(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Result store: one live record per session, fenced by request_id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sort_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            request_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            result_json TEXT,
            error TEXT,
            article_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_session ON articles(session_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_user ON articles(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_goals_user ON goals(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sort_results_session
         ON sort_results(session_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
