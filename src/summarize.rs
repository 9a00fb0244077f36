//! Article summarization with a write-once cache.
//!
//! A summary is generated at most once per article unless the caller asks
//! for regeneration. The generated text is written onto the article row
//! before it is returned, so a concurrent reader never sees a summary that
//! was returned but not stored. A failed generation caches nothing, and an
//! article without readable content is never summarized.

use std::sync::Arc;

use learnflow_core::llm::{GenerationProfile, LlmClient, Model, Prompt};
use learnflow_core::models::Article;
use learnflow_core::store::ArticleStore;
use thiserror::Error;

use crate::content::{truncate_chars, ContentError, ContentResolver};

/// Tokens kept free for the completion when fitting content to a model.
pub(crate) const COMPLETION_RESERVE_TOKENS: usize = 1_024;

const SYSTEM_PROMPT: &str = "You summarize articles for a learner. Write a faithful, \
self-contained summary of at most 200 words covering the main argument, key concepts and \
conclusions. Do not add information that is not in the article.";

/// Why a summary (or a set of notes) could not be produced.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("generation failed for article {article_id}: {message}")]
    Model { article_id: i64, message: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GenerationError {
    pub(crate) fn model(article_id: i64, err: impl std::fmt::Display) -> Self {
        GenerationError::Model {
            article_id,
            message: err.to_string(),
        }
    }
}

pub struct Summarizer {
    store: Arc<dyn ArticleStore>,
    llm: Arc<dyn LlmClient>,
    content: Arc<ContentResolver>,
    model: Model,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        llm: Arc<dyn LlmClient>,
        content: Arc<ContentResolver>,
        model: Model,
    ) -> Self {
        Self {
            store,
            llm,
            content,
            model,
        }
    }

    /// Return the article's summary, generating and storing it if needed.
    ///
    /// With `use_cache`, an existing non-blank summary is returned as is and
    /// no model call is made. The stored article is consulted as well as
    /// `article`, which may be an older snapshot.
    pub async fn summarize(
        &self,
        article: &Article,
        use_cache: bool,
    ) -> Result<String, GenerationError> {
        if use_cache {
            if let Some(cached) = self.cached(article).await? {
                tracing::debug!(article_id = article.id, "summary cache hit");
                return Ok(cached);
            }
        }

        let text = self.content.resolve(article).await?;
        let prompt = summary_prompt(article, &text, self.model);
        let summary = self
            .llm
            .generate(self.model, GenerationProfile::Precise, &prompt)
            .await
            .map_err(|e| GenerationError::model(article.id, format!("{:#}", e)))?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(GenerationError::model(article.id, "model returned an empty summary"));
        }

        self.store.set_article_summary(article.id, &summary).await?;
        tracing::info!(article_id = article.id, model = %self.model, "summary generated");
        Ok(summary)
    }

    async fn cached(&self, article: &Article) -> Result<Option<String>, GenerationError> {
        if let Some(cached) = article.cached_summary() {
            return Ok(Some(cached.to_string()));
        }
        let stored = self.store.get_article(&article.user_id, article.id).await?;
        Ok(stored.and_then(|a| a.cached_summary().map(str::to_string)))
    }
}

/// Build the summary prompt, trimming `text` to what `model` can take.
pub(crate) fn summary_prompt(article: &Article, text: &str, model: Model) -> Prompt {
    let budget_chars = model
        .context_window()
        .saturating_sub(COMPLETION_RESERVE_TOKENS)
        .saturating_mul(4)
        .saturating_sub(SYSTEM_PROMPT.len() + article.title.len() + 64);
    let body = truncate_chars(text, budget_chars);

    Prompt::new(
        SYSTEM_PROMPT,
        format!("Title: {}\n\n{}", article.title.trim(), body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentConfig;
    use crate::content::content_hash;
    use learnflow_core::llm::ScriptedLlm;
    use learnflow_core::models::{ArticleContent, NewArticle, NewSession};
    use learnflow_core::store::memory::InMemoryStore;

    const BODY: &str = "Lifetimes name the regions in which references are valid.";

    struct Fixture {
        store: Arc<InMemoryStore>,
        article: Article,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let session = store
            .create_session(NewSession {
                user_id: "u".to_string(),
                year: 2024,
                month: 1,
                day: 1,
                title: "S".to_string(),
            })
            .await
            .unwrap();
        let article = store
            .create_article(NewArticle {
                user_id: "u".to_string(),
                session_id: session.id,
                title: "Lifetimes".to_string(),
                url: "https://example.com/lifetimes".to_string(),
                authors: None,
            })
            .await
            .unwrap();
        store
            .put_article_content(&ArticleContent {
                article_id: article.id,
                markdown: BODY.to_string(),
                content_hash: content_hash(BODY),
                fetched_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        Fixture { store, article }
    }

    fn summarizer(store: Arc<InMemoryStore>, llm: Arc<ScriptedLlm>) -> Summarizer {
        let content = ContentConfig {
            fetch_remote: false,
            ..ContentConfig::default()
        };
        let resolver = Arc::new(ContentResolver::new(store.clone(), &content).unwrap());
        Summarizer::new(store, llm, resolver, Model::Gpt35Turbo16k)
    }

    #[tokio::test]
    async fn cached_summary_is_reused_without_model_calls() {
        let f = fixture().await;
        let llm = Arc::new(ScriptedLlm::new(|_| Ok("fresh summary".to_string())));
        let s = summarizer(f.store.clone(), llm.clone());

        let first = s.summarize(&f.article, true).await.unwrap();
        assert_eq!(first, "fresh summary");
        assert_eq!(llm.calls(), 1);
        assert_eq!(llm.prompts()[0].user, format!("Title: Lifetimes\n\n{}", BODY));

        let stored = f.store.get_article("u", f.article.id).await.unwrap().unwrap();
        for _ in 0..3 {
            assert_eq!(s.summarize(&stored, true).await.unwrap(), first);
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn bypassing_cache_regenerates() {
        let f = fixture().await;
        f.store
            .set_article_summary(f.article.id, "old")
            .await
            .unwrap();
        let stored = f.store.get_article("u", f.article.id).await.unwrap().unwrap();

        let llm = Arc::new(ScriptedLlm::new(|_| Ok("new".to_string())));
        let s = summarizer(f.store.clone(), llm.clone());
        assert_eq!(s.summarize(&stored, false).await.unwrap(), "new");
        assert_eq!(llm.calls(), 1);
        let reloaded = f.store.get_article("u", f.article.id).await.unwrap().unwrap();
        assert_eq!(reloaded.summary.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn failure_caches_nothing() {
        let f = fixture().await;
        let llm = Arc::new(ScriptedLlm::new(|_| anyhow::bail!("rate limited")));
        let s = summarizer(f.store.clone(), llm);

        let err = s.summarize(&f.article, true).await.unwrap_err();
        assert!(matches!(err, GenerationError::Model { .. }));
        assert!(err.to_string().contains("rate limited"));
        let reloaded = f.store.get_article("u", f.article.id).await.unwrap().unwrap();
        assert!(reloaded.summary.is_none());
    }

    #[tokio::test]
    async fn blank_cached_summary_is_a_miss() {
        let f = fixture().await;
        f.store.set_article_summary(f.article.id, "   ").await.unwrap();
        let stored = f.store.get_article("u", f.article.id).await.unwrap().unwrap();

        let llm = Arc::new(ScriptedLlm::new(|_| Ok("real".to_string())));
        let s = summarizer(f.store.clone(), llm.clone());
        assert_eq!(s.summarize(&stored, true).await.unwrap(), "real");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn article_without_content_is_not_summarized() {
        let f = fixture().await;
        let bare = f
            .store
            .create_article(NewArticle {
                user_id: "u".to_string(),
                session_id: f.article.session_id,
                title: "Borrowing".to_string(),
                url: "https://example.com/borrowing".to_string(),
                authors: None,
            })
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlm::new(|_| Ok("made up".to_string())));
        let s = summarizer(f.store.clone(), llm.clone());

        let err = s.summarize(&bare, true).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Content(ContentError::Missing(id)) if id == bare.id
        ));
        assert_eq!(llm.calls(), 0);
        let reloaded = f.store.get_article("u", bare.id).await.unwrap().unwrap();
        assert!(reloaded.summary.is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_uses_the_stored_summary() {
        let f = fixture().await;
        let snapshot = f.article.clone();
        f.store
            .set_article_summary(f.article.id, "stored meanwhile")
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(|_| Ok("regenerated".to_string())));
        let s = summarizer(f.store.clone(), llm.clone());
        assert_eq!(s.summarize(&snapshot, true).await.unwrap(), "stored meanwhile");
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn prompt_fits_small_context_window() {
        let article = Article {
            id: 1,
            user_id: "u".to_string(),
            session_id: 1,
            title: "Big".to_string(),
            url: String::new(),
            summary: None,
            authors: None,
            created_at: chrono::Utc::now(),
        };
        let text = "x".repeat(100_000);
        let prompt = summary_prompt(&article, &text, Model::Gpt35Turbo);
        let window = Model::Gpt35Turbo.context_window();
        assert!(prompt.estimated_tokens() + COMPLETION_RESERVE_TOKENS <= window);
    }
}
