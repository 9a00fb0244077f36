//! In-memory store implementing every storage trait.
//!
//! All state lives behind one `std::sync::Mutex`, which also makes
//! [`ResultStore::begin`] trivially atomic. Used by tests and by callers
//! that want the pipeline without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    Article, ArticleContent, Goal, LearningSession, NewArticle, NewSession, Note, SortOutcome,
    SortRecord, SortStatus, WriteOutcome,
};

use super::{ArticleStore, GoalStore, ResultStore};

#[derive(Default)]
struct State {
    next_id: i64,
    sessions: Vec<LearningSession>,
    articles: Vec<Article>,
    content: HashMap<i64, ArticleContent>,
    notes: Vec<Note>,
    goals: Vec<Goal>,
    results: HashMap<i64, SortRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store for tests and database-free embedding.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl ArticleStore for InMemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession> {
        let mut state = self.lock()?;
        let session = LearningSession {
            id: state.next_id(),
            user_id: new.user_id,
            year: new.year,
            month: new.month,
            day: new.day,
            title: new.title,
            summary: None,
            created_at: Utc::now(),
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, user_id: &str, session_id: i64) -> Result<Option<LearningSession>> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .find(|s| s.id == session_id && s.user_id == user_id)
            .cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>> {
        let state = self.lock()?;
        let mut sessions: Vec<_> = state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn create_article(&self, new: NewArticle) -> Result<Article> {
        let mut state = self.lock()?;
        let article = Article {
            id: state.next_id(),
            user_id: new.user_id,
            session_id: new.session_id,
            title: new.title,
            url: new.url,
            summary: None,
            authors: new.authors,
            created_at: Utc::now(),
        };
        state.articles.push(article.clone());
        Ok(article)
    }

    async fn get_article(&self, user_id: &str, article_id: i64) -> Result<Option<Article>> {
        let state = self.lock()?;
        Ok(state
            .articles
            .iter()
            .find(|a| a.id == article_id && a.user_id == user_id)
            .cloned())
    }

    async fn list_articles_for_session(
        &self,
        user_id: &str,
        session_id: i64,
    ) -> Result<Vec<Article>> {
        let state = self.lock()?;
        Ok(state
            .articles
            .iter()
            .filter(|a| a.session_id == session_id && a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_articles_for_user(&self, user_id: &str) -> Result<Vec<Article>> {
        let state = self.lock()?;
        Ok(state
            .articles
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_article_summary(&self, article_id: i64, summary: &str) -> Result<()> {
        let mut state = self.lock()?;
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.id == article_id)
            .ok_or_else(|| anyhow!("article {} not found", article_id))?;
        article.summary = Some(summary.to_string());
        Ok(())
    }

    async fn get_article_content(&self, article_id: i64) -> Result<Option<ArticleContent>> {
        Ok(self.lock()?.content.get(&article_id).cloned())
    }

    async fn put_article_content(&self, content: &ArticleContent) -> Result<()> {
        self.lock()?
            .content
            .insert(content.article_id, content.clone());
        Ok(())
    }

    async fn add_note(&self, article_id: i64, note: &str) -> Result<Note> {
        let mut state = self.lock()?;
        let note = Note {
            id: state.next_id(),
            article_id,
            note: note.to_string(),
            created_at: Utc::now(),
        };
        state.notes.push(note.clone());
        Ok(note)
    }

    async fn list_notes(&self, article_id: i64) -> Result<Vec<Note>> {
        let state = self.lock()?;
        Ok(state
            .notes
            .iter()
            .filter(|n| n.article_id == article_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GoalStore for InMemoryStore {
    async fn goals_for_user(&self, user_id: &str) -> Result<Vec<Goal>> {
        let state = self.lock()?;
        Ok(state
            .goals
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_goal(&self, user_id: &str, goal: &str) -> Result<Goal> {
        let mut state = self.lock()?;
        let goal = Goal {
            id: state.next_id(),
            user_id: user_id.to_string(),
            goal: goal.to_string(),
            created_at: Utc::now(),
        };
        state.goals.push(goal.clone());
        Ok(goal)
    }

    async fn delete_goal(&self, user_id: &str, goal_id: i64) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.goals.len();
        state
            .goals
            .retain(|g| !(g.id == goal_id && g.user_id == user_id));
        Ok(state.goals.len() != before)
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn get(&self, session_id: i64) -> Result<Option<SortRecord>> {
        Ok(self.lock()?.results.get(&session_id).cloned())
    }

    async fn begin(&self, session_id: i64, request_id: Uuid) -> Result<()> {
        let now = Utc::now();
        self.lock()?.results.insert(
            session_id,
            SortRecord {
                session_id,
                request_id,
                status: SortStatus::Pending,
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn put(
        &self,
        session_id: i64,
        request_id: Uuid,
        outcome: &SortOutcome,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock()?;
        let record = match state.results.get_mut(&session_id) {
            Some(r) if r.request_id == request_id && r.status == SortStatus::Pending => r,
            _ => return Ok(WriteOutcome::Superseded),
        };
        record.status = outcome.status();
        record.updated_at = Utc::now();
        match outcome {
            SortOutcome::Completed(result) => record.result = Some(result.clone()),
            SortOutcome::Failed(message) => record.error = Some(message.clone()),
        }
        Ok(WriteOutcome::Written)
    }

    async fn delete(&self, session_id: i64) -> Result<()> {
        self.lock()?.results.remove(&session_id);
        Ok(())
    }

    async fn count_sorted_articles_on(&self, date: NaiveDate) -> Result<i64> {
        let state = self.lock()?;
        Ok(state
            .results
            .values()
            .filter(|r| r.status == SortStatus::Completed && r.updated_at.date_naive() == date)
            .filter_map(|r| r.result.as_ref())
            .map(|r| r.sorted_articles.len() as i64)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RankedArticle, RankingResult};

    fn ranking(session_id: i64, n: u32) -> RankingResult {
        RankingResult {
            session_id,
            sorted_articles: (1..=n)
                .map(|i| RankedArticle {
                    id: i as i64,
                    title: format!("T{i}"),
                    sort: i,
                    reason: String::new(),
                    information_flow: String::new(),
                })
                .collect(),
            ranked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn begin_then_put_completes_record() {
        let store = InMemoryStore::new();
        let rid = Uuid::new_v4();
        store.begin(7, rid).await.unwrap();
        assert_eq!(
            store.get(7).await.unwrap().unwrap().status,
            SortStatus::Pending
        );

        let outcome = SortOutcome::Completed(ranking(7, 3));
        assert_eq!(
            store.put(7, rid, &outcome).await.unwrap(),
            WriteOutcome::Written
        );
        let record = store.get(7).await.unwrap().unwrap();
        assert_eq!(record.status, SortStatus::Completed);
        assert_eq!(record.result.unwrap().sorted_articles.len(), 3);
    }

    #[tokio::test]
    async fn stale_request_cannot_overwrite_newer_one() {
        let store = InMemoryStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.begin(7, first).await.unwrap();
        store.begin(7, second).await.unwrap();

        let late = SortOutcome::Completed(ranking(7, 2));
        assert_eq!(
            store.put(7, first, &late).await.unwrap(),
            WriteOutcome::Superseded
        );
        let record = store.get(7).await.unwrap().unwrap();
        assert_eq!(record.request_id, second);
        assert_eq!(record.status, SortStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_record_is_written_once() {
        let store = InMemoryStore::new();
        let rid = Uuid::new_v4();
        store.begin(7, rid).await.unwrap();
        store
            .put(7, rid, &SortOutcome::Failed("boom".to_string()))
            .await
            .unwrap();
        let again = store
            .put(7, rid, &SortOutcome::Completed(ranking(7, 1)))
            .await
            .unwrap();
        assert_eq!(again, WriteOutcome::Superseded);
        assert_eq!(
            store.get(7).await.unwrap().unwrap().error.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn counts_sorted_articles_for_today() {
        let store = InMemoryStore::new();
        for (session, n) in [(1, 3), (2, 2)] {
            let rid = Uuid::new_v4();
            store.begin(session, rid).await.unwrap();
            store
                .put(session, rid, &SortOutcome::Completed(ranking(session, n)))
                .await
                .unwrap();
        }
        let pending = Uuid::new_v4();
        store.begin(3, pending).await.unwrap();

        let today = Utc::now().date_naive();
        assert_eq!(store.count_sorted_articles_on(today).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn reads_are_scoped_to_owner() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(NewSession {
                user_id: "alice".to_string(),
                year: 2024,
                month: 5,
                day: 1,
                title: "S".to_string(),
            })
            .await
            .unwrap();
        assert!(store.get_session("bob", session.id).await.unwrap().is_none());
        assert!(store
            .get_session("alice", session.id)
            .await
            .unwrap()
            .is_some());

        let goal = store.create_goal("alice", "learn").await.unwrap();
        assert!(!store.delete_goal("bob", goal.id).await.unwrap());
        assert!(store.delete_goal("alice", goal.id).await.unwrap());
    }
}
