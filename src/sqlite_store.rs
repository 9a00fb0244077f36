//! SQLite-backed implementation of the storage traits.
//!
//! One [`SqliteStore`] wraps a pool and implements [`ArticleStore`],
//! [`GoalStore`] and [`ResultStore`] against the tables created by
//! [`crate::migrate`]. Timestamps are stored as Unix seconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use learnflow_core::models::{
    Article, ArticleContent, Goal, LearningSession, NewArticle, NewSession, Note, RankingResult,
    SortOutcome, SortRecord, SortStatus, WriteOutcome,
};
use learnflow_core::store::{ArticleStore, GoalStore, ResultStore};

/// SQLite implementation of every LearnFlow store trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// A lookup against a table that has not been created yet.
///
/// The result store treats this as "no record" so a poll against a
/// freshly provisioned database reports "in progress" instead of failing.
fn is_missing_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("no such table"),
        _ => false,
    }
}

fn session_from_row(row: &SqliteRow) -> Result<LearningSession> {
    Ok(LearningSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        year: row.try_get::<i64, _>("year")? as i32,
        month: row.try_get::<i64, _>("month")? as u32,
        day: row.try_get::<i64, _>("day")? as u32,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        summary: row.try_get("summary")?,
        authors: row.try_get("authors")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

fn goal_from_row(row: &SqliteRow) -> Result<Goal> {
    Ok(Goal {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        goal: row.try_get("goal")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

fn note_from_row(row: &SqliteRow) -> Result<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        article_id: row.try_get("article_id")?,
        note: row.try_get("note")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

fn record_from_row(row: &SqliteRow) -> Result<SortRecord> {
    let request_id: String = row.try_get("request_id")?;
    let status: String = row.try_get("status")?;
    let result_json: Option<String> = row.try_get("result_json")?;

    let result = match result_json {
        Some(json) => Some(
            serde_json::from_str::<RankingResult>(&json)
                .context("Corrupt ranking result in sort_results")?,
        ),
        None => None,
    };

    Ok(SortRecord {
        session_id: row.try_get("session_id")?,
        request_id: Uuid::parse_str(&request_id)
            .with_context(|| format!("Corrupt request id in sort_results: {}", request_id))?,
        status: SortStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown sort status in sort_results: {}", status))?,
        result,
        error: row.try_get("error")?,
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO learning_sessions (user_id, year, month, day, title, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.user_id)
        .bind(new.year as i64)
        .bind(new.month as i64)
        .bind(new.day as i64)
        .bind(&new.title)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(LearningSession {
            id,
            user_id: new.user_id,
            year: new.year,
            month: new.month,
            day: new.day,
            title: new.title,
            summary: None,
            created_at: ts(now.timestamp()),
        })
    }

    async fn get_session(&self, user_id: &str, session_id: i64) -> Result<Option<LearningSession>> {
        let row = sqlx::query("SELECT * FROM learning_sessions WHERE id = ? AND user_id = ?")
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>> {
        let rows = sqlx::query(
            "SELECT * FROM learning_sessions WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn create_article(&self, new: NewArticle) -> Result<Article> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO articles (user_id, session_id, title, url, authors, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.user_id)
        .bind(new.session_id)
        .bind(&new.title)
        .bind(&new.url)
        .bind(&new.authors)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Article {
            id,
            user_id: new.user_id,
            session_id: new.session_id,
            title: new.title,
            url: new.url,
            summary: None,
            authors: new.authors,
            created_at: ts(now.timestamp()),
        })
    }

    async fn get_article(&self, user_id: &str, article_id: i64) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ? AND user_id = ?")
            .bind(article_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn list_articles_for_session(
        &self,
        user_id: &str,
        session_id: i64,
    ) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE session_id = ? AND user_id = ? ORDER BY created_at, id",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(article_from_row).collect()
    }

    async fn list_articles_for_user(&self, user_id: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query("SELECT * FROM articles WHERE user_id = ? ORDER BY created_at, id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(article_from_row).collect()
    }

    async fn set_article_summary(&self, article_id: i64, summary: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE articles SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(article_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            anyhow::bail!("article {} not found", article_id);
        }
        Ok(())
    }

    async fn get_article_content(&self, article_id: i64) -> Result<Option<ArticleContent>> {
        let row = sqlx::query("SELECT * FROM article_content WHERE article_id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(ArticleContent {
                article_id: row.try_get("article_id")?,
                markdown: row.try_get("markdown")?,
                content_hash: row.try_get("content_hash")?,
                fetched_at: ts(row.try_get("fetched_at")?),
            })),
            None => Ok(None),
        }
    }

    async fn put_article_content(&self, content: &ArticleContent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_content (article_id, markdown, content_hash, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                markdown = excluded.markdown,
                content_hash = excluded.content_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(content.article_id)
        .bind(&content.markdown)
        .bind(&content.content_hash)
        .bind(content.fetched_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_note(&self, article_id: i64, note: &str) -> Result<Note> {
        let now = Utc::now();
        let id = sqlx::query("INSERT INTO notes (article_id, note, created_at) VALUES (?, ?, ?)")
            .bind(article_id)
            .bind(note)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(Note {
            id,
            article_id,
            note: note.to_string(),
            created_at: ts(now.timestamp()),
        })
    }

    async fn list_notes(&self, article_id: i64) -> Result<Vec<Note>> {
        let rows = sqlx::query("SELECT * FROM notes WHERE article_id = ? ORDER BY created_at, id")
            .bind(article_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(note_from_row).collect()
    }
}

#[async_trait]
impl GoalStore for SqliteStore {
    async fn goals_for_user(&self, user_id: &str) -> Result<Vec<Goal>> {
        let rows = sqlx::query("SELECT * FROM goals WHERE user_id = ? ORDER BY created_at, id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(goal_from_row).collect()
    }

    async fn create_goal(&self, user_id: &str, goal: &str) -> Result<Goal> {
        let now = Utc::now();
        let id = sqlx::query("INSERT INTO goals (user_id, goal, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(goal)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(Goal {
            id,
            user_id: user_id.to_string(),
            goal: goal.to_string(),
            created_at: ts(now.timestamp()),
        })
    }

    async fn delete_goal(&self, user_id: &str, goal_id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM goals WHERE id = ? AND user_id = ?")
            .bind(goal_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn get(&self, session_id: i64) -> Result<Option<SortRecord>> {
        // Most recent first: tolerates a transient second row between
        // a delete and the next insert.
        let row = sqlx::query(
            r#"
            SELECT session_id, request_id, status, result_json, error, created_at, updated_at
            FROM sort_results
            WHERE session_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => record_from_row(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table(&e) => {
                tracing::debug!(session_id, "sort_results table missing; reporting no record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn begin(&self, session_id: i64, request_id: Uuid) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sort_results WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO sort_results (session_id, request_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(request_id.to_string())
        .bind(SortStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn put(
        &self,
        session_id: i64,
        request_id: Uuid,
        outcome: &SortOutcome,
    ) -> Result<WriteOutcome> {
        let (result_json, error, article_count) = match outcome {
            SortOutcome::Completed(result) => (
                Some(serde_json::to_string(result)?),
                None,
                result.sorted_articles.len() as i64,
            ),
            SortOutcome::Failed(message) => (None, Some(message.clone()), 0),
        };

        let updated = sqlx::query(
            r#"
            UPDATE sort_results
            SET status = ?, result_json = ?, error = ?, article_count = ?, updated_at = ?
            WHERE session_id = ? AND request_id = ? AND status = ?
            "#,
        )
        .bind(outcome.status().as_str())
        .bind(result_json)
        .bind(error)
        .bind(article_count)
        .bind(Utc::now().timestamp())
        .bind(session_id)
        .bind(request_id.to_string())
        .bind(SortStatus::Pending.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(if updated == 0 {
            WriteOutcome::Superseded
        } else {
            WriteOutcome::Written
        })
    }

    async fn delete(&self, session_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sort_results WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_sorted_articles_on(&self, date: NaiveDate) -> Result<i64> {
        let start = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid date: {}", date))?
            .and_utc()
            .timestamp();
        let end = start + 86_400;

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(article_count), 0) FROM sort_results
            WHERE status = ? AND updated_at >= ? AND updated_at < ?
            "#,
        )
        .bind(SortStatus::Completed.as_str())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnflow_core::models::RankedArticle;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn migrated_store() -> SqliteStore {
        let pool = memory_pool().await;
        crate::migrate::create_tables(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn ranking(session_id: i64) -> RankingResult {
        RankingResult {
            session_id,
            sorted_articles: vec![
                RankedArticle {
                    id: 2,
                    title: "B".to_string(),
                    sort: 1,
                    reason: "r".to_string(),
                    information_flow: "f".to_string(),
                },
                RankedArticle {
                    id: 1,
                    title: "A".to_string(),
                    sort: 2,
                    reason: "r".to_string(),
                    information_flow: "f".to_string(),
                },
            ],
            ranked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_without_table_is_in_progress() {
        let store = SqliteStore::new(memory_pool().await);
        assert!(store.get(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_lookup_failures_surface() {
        let pool = memory_pool().await;
        let store = SqliteStore::new(pool.clone());
        pool.close().await;
        assert!(store.get(7).await.is_err());
    }

    #[tokio::test]
    async fn result_record_lifecycle() {
        let store = migrated_store().await;
        let rid = Uuid::new_v4();

        store.begin(7, rid).await.unwrap();
        let pending = store.get(7).await.unwrap().unwrap();
        assert_eq!(pending.status, SortStatus::Pending);
        assert_eq!(pending.request_id, rid);

        let written = store
            .put(7, rid, &SortOutcome::Completed(ranking(7)))
            .await
            .unwrap();
        assert_eq!(written, WriteOutcome::Written);

        let done = store.get(7).await.unwrap().unwrap();
        assert_eq!(done.status, SortStatus::Completed);
        let titles: Vec<_> = done
            .result
            .unwrap()
            .sorted_articles
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["B", "A"]);

        store.delete(7).await.unwrap();
        assert!(store.get(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn superseded_request_write_is_rejected() {
        let store = migrated_store().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.begin(7, first).await.unwrap();
        store.begin(7, second).await.unwrap();

        let late = store
            .put(7, first, &SortOutcome::Completed(ranking(7)))
            .await
            .unwrap();
        assert_eq!(late, WriteOutcome::Superseded);

        let current = store.get(7).await.unwrap().unwrap();
        assert_eq!(current.request_id, second);
        assert_eq!(current.status, SortStatus::Pending);
    }

    #[tokio::test]
    async fn failure_record_keeps_message() {
        let store = migrated_store().await;
        let rid = Uuid::new_v4();
        store.begin(3, rid).await.unwrap();
        store
            .put(3, rid, &SortOutcome::Failed("model unavailable".to_string()))
            .await
            .unwrap();
        let record = store.get(3).await.unwrap().unwrap();
        assert_eq!(record.status, SortStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model unavailable"));
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn counts_completed_articles_by_day() {
        let store = migrated_store().await;
        let rid = Uuid::new_v4();
        store.begin(7, rid).await.unwrap();
        store
            .put(7, rid, &SortOutcome::Completed(ranking(7)))
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        assert_eq!(store.count_sorted_articles_on(today).await.unwrap(), 2);
        let long_ago = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        assert_eq!(store.count_sorted_articles_on(long_ago).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn article_summary_and_content_round_trip() {
        let store = migrated_store().await;
        let session = store
            .create_session(NewSession {
                user_id: "u1".to_string(),
                year: 2024,
                month: 3,
                day: 9,
                title: "Session".to_string(),
            })
            .await
            .unwrap();
        let article = store
            .create_article(NewArticle {
                user_id: "u1".to_string(),
                session_id: session.id,
                title: "A".to_string(),
                url: "https://example.com/a".to_string(),
                authors: Some("Ada".to_string()),
            })
            .await
            .unwrap();

        store.set_article_summary(article.id, "short").await.unwrap();
        let loaded = store.get_article("u1", article.id).await.unwrap().unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("short"));
        assert!(store.get_article("u2", article.id).await.unwrap().is_none());

        let content = ArticleContent {
            article_id: article.id,
            markdown: "# A".to_string(),
            content_hash: "abc".to_string(),
            fetched_at: ts(Utc::now().timestamp()),
        };
        store.put_article_content(&content).await.unwrap();
        assert_eq!(
            store.get_article_content(article.id).await.unwrap(),
            Some(content)
        );

        let listed = store
            .list_articles_for_session("u1", session.id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.set_article_summary(9_999, "x").await.is_err());
    }
}
