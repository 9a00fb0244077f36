//! Storage abstraction for LearnFlow.
//!
//! Three traits split the external data the sorting pipeline touches:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`ArticleStore`] | sessions, articles, readable content, notes |
//! | [`GoalStore`] | the user's learning goals |
//! | [`ResultStore`] | one sort record per session, written by the worker and read by pollers |
//!
//! Implementations must be `Send + Sync` so one instance can be shared by
//! the HTTP handlers and the background worker.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{
    Article, ArticleContent, Goal, LearningSession, NewArticle, NewSession, Note, SortOutcome,
    SortRecord, WriteOutcome,
};

/// Sessions, articles and everything hanging off an article.
///
/// Reads that take a `user_id` only return rows owned by that user.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession>;

    async fn get_session(&self, user_id: &str, session_id: i64) -> Result<Option<LearningSession>>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>>;

    async fn create_article(&self, new: NewArticle) -> Result<Article>;

    async fn get_article(&self, user_id: &str, article_id: i64) -> Result<Option<Article>>;

    /// Articles of one session, oldest first.
    async fn list_articles_for_session(&self, user_id: &str, session_id: i64)
        -> Result<Vec<Article>>;

    async fn list_articles_for_user(&self, user_id: &str) -> Result<Vec<Article>>;

    /// Persist a generated summary onto the article row.
    async fn set_article_summary(&self, article_id: i64, summary: &str) -> Result<()>;

    async fn get_article_content(&self, article_id: i64) -> Result<Option<ArticleContent>>;

    async fn put_article_content(&self, content: &ArticleContent) -> Result<()>;

    async fn add_note(&self, article_id: i64, note: &str) -> Result<Note>;

    async fn list_notes(&self, article_id: i64) -> Result<Vec<Note>>;
}

/// A user's stated learning goals.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn goals_for_user(&self, user_id: &str) -> Result<Vec<Goal>>;

    async fn create_goal(&self, user_id: &str, goal: &str) -> Result<Goal>;

    /// Returns `false` when no goal with that id belongs to the user.
    async fn delete_goal(&self, user_id: &str, goal_id: i64) -> Result<bool>;
}

/// The per-session sort result record.
///
/// At most one record is live per session. A missing record means "still
/// computing or never submitted" and is never an error.
///
/// Writes are fenced by request id: [`begin`](ResultStore::begin) replaces
/// the session's record with a pending marker for a new request, and
/// [`put`](ResultStore::put) only lands on the pending marker of the same
/// request. A job superseded by a newer submission cannot overwrite it.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// The most recent record for the session, if any.
    async fn get(&self, session_id: i64) -> Result<Option<SortRecord>>;

    /// Drop any record for the session and install a pending marker for
    /// `request_id`, atomically.
    async fn begin(&self, session_id: i64, request_id: Uuid) -> Result<()>;

    /// Write the terminal outcome for `request_id`.
    async fn put(
        &self,
        session_id: i64,
        request_id: Uuid,
        outcome: &SortOutcome,
    ) -> Result<WriteOutcome>;

    /// Drop any record for the session.
    async fn delete(&self, session_id: i64) -> Result<()>;

    /// Number of articles in rankings completed on `date` (UTC).
    async fn count_sorted_articles_on(&self, date: NaiveDate) -> Result<i64>;
}
