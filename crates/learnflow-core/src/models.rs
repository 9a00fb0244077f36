//! Core data models used throughout LearnFlow.
//!
//! These types represent the sessions, articles, goals and ranking results
//! that flow between the HTTP surface, the background sort worker and the
//! stores. Wire names are camelCase to match the JSON contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dated container of articles a user wants ranked together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSession {
    pub id: i64,
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub title: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`LearningSession`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub title: String,
}

/// One imported source document.
///
/// Belongs to exactly one session and one owning user. `summary` is filled
/// lazily by the summarizer and then reused until explicitly regenerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub user_id: String,
    pub session_id: i64,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub authors: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// Returns the cached summary when it is present and non-blank.
    pub fn cached_summary(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Fields needed to create an [`Article`].
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub user_id: String,
    pub session_id: i64,
    pub title: String,
    pub url: String,
    pub authors: Option<String>,
}

/// Readable text of an article, cached so it is fetched at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleContent {
    pub article_id: i64,
    pub markdown: String,
    /// SHA-256 of `markdown`, hex encoded.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// A stated learning goal. The ranker reads all goals of the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: i64,
    pub user_id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

/// Generated study notes for an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub article_id: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// One entry of a ranking: 1-based position plus the model's rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedArticle {
    pub id: i64,
    pub title: String,
    pub sort: u32,
    pub reason: String,
    pub information_flow: String,
}

/// The output of one ranker invocation for a session.
///
/// `sorted_articles` is ordered by `sort` and its positions form a
/// permutation of `1..=N` over the N input articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingResult {
    pub session_id: i64,
    pub sorted_articles: Vec<RankedArticle>,
    pub ranked_at: DateTime<Utc>,
}

/// Lifecycle state of a result-store record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStatus {
    Pending,
    Completed,
    Failed,
}

impl SortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortStatus::Pending => "pending",
            SortStatus::Completed => "completed",
            SortStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SortStatus::Pending),
            "completed" => Some(SortStatus::Completed),
            "failed" => Some(SortStatus::Failed),
            _ => None,
        }
    }
}

/// The terminal outcome a sort worker writes for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SortOutcome {
    Completed(RankingResult),
    Failed(String),
}

impl SortOutcome {
    pub fn status(&self) -> SortStatus {
        match self {
            SortOutcome::Completed(_) => SortStatus::Completed,
            SortOutcome::Failed(_) => SortStatus::Failed,
        }
    }
}

/// The single live result-store record for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SortRecord {
    pub session_id: i64,
    pub request_id: Uuid,
    pub status: SortStatus,
    pub result: Option<RankingResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether a fenced result write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A newer request owns the session's record; the write was dropped.
    Superseded,
}
