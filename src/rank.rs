//! The relevance ranker.
//!
//! One ranking is one prompt over every article in the set plus the user's
//! goals. The model's reply must be a strict permutation of the input
//! (see [`learnflow_core::ranking`]); a reply that is not is retried as a
//! whole, up to `[sorting].max_rank_attempts` times, and never repaired.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use learnflow_core::llm::{GenerationProfile, LlmClient, Model};
use learnflow_core::models::{Article, RankingResult};
use learnflow_core::ranking::{build_prompt, parse_ranking};
use learnflow_core::store::GoalStore;

use crate::summarize::COMPLETION_RESERVE_TOKENS;

pub struct RelevanceRanker {
    goals: Arc<dyn GoalStore>,
    llm: Arc<dyn LlmClient>,
    model: Model,
    max_attempts: u32,
}

impl RelevanceRanker {
    pub fn new(
        goals: Arc<dyn GoalStore>,
        llm: Arc<dyn LlmClient>,
        model: Model,
        max_attempts: u32,
    ) -> Self {
        Self {
            goals,
            llm,
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Rank `articles` for `user_id` against the user's stored goals.
    ///
    /// An empty article set yields an empty ranking without a model call.
    pub async fn rank(
        &self,
        user_id: &str,
        session_id: i64,
        articles: &[Article],
    ) -> Result<RankingResult> {
        if articles.is_empty() {
            return Ok(RankingResult {
                session_id,
                sorted_articles: Vec::new(),
                ranked_at: Utc::now(),
            });
        }

        let goals = self
            .goals
            .goals_for_user(user_id)
            .await
            .context("Failed to load learning goals")?;
        let prompt = build_prompt(&goals, articles);

        let needed = prompt.estimated_tokens() + COMPLETION_RESERVE_TOKENS;
        if needed > self.model.context_window() {
            bail!(
                "ranking prompt for {} articles needs ~{} tokens but {} accepts {}",
                articles.len(),
                needed,
                self.model,
                self.model.context_window()
            );
        }

        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            let reply = self
                .llm
                .generate(self.model, GenerationProfile::Precise, &prompt)
                .await
                .context("Ranking generation failed")?;

            match parse_ranking(&reply, articles) {
                Ok(sorted_articles) => {
                    tracing::info!(
                        session_id,
                        articles = articles.len(),
                        goals = goals.len(),
                        attempt,
                        "ranking accepted"
                    );
                    return Ok(RankingResult {
                        session_id,
                        sorted_articles,
                        ranked_at: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(session_id, attempt, error = %e, "ranking reply rejected");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => anyhow::Error::new(e).context(format!(
                "Ranking rejected after {} attempts",
                self.max_attempts
            )),
            None => anyhow!("Ranking produced no reply"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnflow_core::llm::ScriptedLlm;
    use learnflow_core::ranking::RankingError;
    use learnflow_core::store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn article(id: i64, title: &str) -> Article {
        Article {
            id,
            user_id: "u".to_string(),
            session_id: 7,
            title: title.to_string(),
            url: format!("https://example.com/{id}"),
            summary: Some(format!("about {title}")),
            authors: None,
            created_at: Utc::now(),
        }
    }

    fn reply(order: &[(i64, u32)]) -> String {
        let entries: Vec<_> = order
            .iter()
            .map(|(id, sort)| {
                serde_json::json!({
                    "id": id, "title": "ignored", "sort": sort,
                    "reason": "fits", "informationFlow": "builds on previous"
                })
            })
            .collect();
        serde_json::json!({ "sortedArticles": entries }).to_string()
    }

    fn ranker(store: Arc<InMemoryStore>, llm: Arc<ScriptedLlm>, model: Model) -> RelevanceRanker {
        RelevanceRanker::new(store, llm, model, 2)
    }

    #[tokio::test]
    async fn accepts_a_permutation() {
        let store = Arc::new(InMemoryStore::new());
        store.create_goal("u", "understand async Rust").await.unwrap();
        let llm = Arc::new(ScriptedLlm::new(|p| {
            assert!(p.user.contains("understand async Rust"));
            Ok(reply(&[(2, 1), (1, 2), (3, 3)]))
        }));
        let articles = vec![article(1, "A"), article(2, "B"), article(3, "C")];

        let result = ranker(store, llm.clone(), Model::Gpt35Turbo16k)
            .rank("u", 7, &articles)
            .await
            .unwrap();

        let titles: Vec<_> = result.sorted_articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A", "C"]);
        let ranks: Vec<_> = result.sorted_articles.iter().map(|a| a.sort).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn retries_a_malformed_reply_once() {
        let store = Arc::new(InMemoryStore::new());
        let n = Arc::new(AtomicUsize::new(0));
        let counter = n.clone();
        let llm = Arc::new(ScriptedLlm::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(reply(&[(1, 1), (2, 1)]))
            } else {
                Ok(reply(&[(1, 2), (2, 1)]))
            }
        }));
        let articles = vec![article(1, "A"), article(2, "B")];

        let result = ranker(store, llm.clone(), Model::Gpt35Turbo16k)
            .rank("u", 7, &articles)
            .await
            .unwrap();
        assert_eq!(result.sorted_articles[0].id, 2);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedLlm::new(|_| Ok(reply(&[(1, 1)]))));
        let articles = vec![article(1, "A"), article(2, "B")];

        let err = ranker(store, llm.clone(), Model::Gpt35Turbo16k)
            .rank("u", 7, &articles)
            .await
            .unwrap_err();
        assert_eq!(llm.calls(), 2);
        assert_eq!(
            err.downcast_ref::<RankingError>(),
            Some(&RankingError::CountMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[tokio::test]
    async fn model_failure_is_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedLlm::new(|_| anyhow::bail!("503 from provider")));
        let articles = vec![article(1, "A")];

        assert!(ranker(store, llm.clone(), Model::Gpt35Turbo16k)
            .rank("u", 7, &articles)
            .await
            .is_err());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn empty_input_needs_no_model() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedLlm::new(|_| anyhow::bail!("must not be called")));
        let result = ranker(store, llm.clone(), Model::Gpt35Turbo16k)
            .rank("u", 7, &[])
            .await
            .unwrap();
        assert!(result.sorted_articles.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn rejects_prompt_larger_than_context() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedLlm::new(|_| Ok(String::new())));
        let mut big = article(1, "A");
        big.summary = Some("word ".repeat(5_000));

        let err = ranker(store, llm.clone(), Model::Gpt35Turbo)
            .rank("u", 7, &[big])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tokens"));
        assert_eq!(llm.calls(), 0);
    }
}
