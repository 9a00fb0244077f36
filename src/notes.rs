//! Study-note generation for a single article.
//!
//! Synchronous counterpart to the sort pipeline: one model call, one
//! stored note, returned to the caller.

use std::sync::Arc;

use learnflow_core::llm::{GenerationProfile, LlmClient, Model, Prompt};
use learnflow_core::models::{Article, Note};
use learnflow_core::store::ArticleStore;

use crate::content::{truncate_chars, ContentResolver};
use crate::summarize::{GenerationError, COMPLETION_RESERVE_TOKENS};

const SYSTEM_PROMPT: &str = "You write study notes for a learner. Produce concise bullet-point \
notes capturing the key definitions, ideas and takeaways of the article, in Markdown.";

pub struct NoteTaker {
    store: Arc<dyn ArticleStore>,
    llm: Arc<dyn LlmClient>,
    content: Arc<ContentResolver>,
    model: Model,
}

impl NoteTaker {
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

    /// Generate notes for `article` and store them.
    pub async fn take_notes(&self, article: &Article) -> Result<Note, GenerationError> {
        let text = self.content.resolve(article).await?;
        let budget = self
            .model
            .context_window()
            .saturating_sub(COMPLETION_RESERVE_TOKENS)
            .saturating_mul(4)
            .saturating_sub(SYSTEM_PROMPT.len() + article.title.len() + 64);

        let mut user = format!("Title: {}\n", article.title.trim());
        if let Some(summary) = article.cached_summary() {
            user.push_str(&format!("Summary: {}\n", summary));
        }
        user.push('\n');
        let remaining = budget.saturating_sub(user.chars().count());
        user.push_str(&truncate_chars(&text, remaining));

        let notes = self
            .llm
            .generate(
                self.model,
                GenerationProfile::Precise,
                &Prompt::new(SYSTEM_PROMPT, user),
            )
            .await
            .map_err(|e| GenerationError::model(article.id, format!("{:#}", e)))?;
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(GenerationError::model(article.id, "model returned empty notes"));
        }

        let note = self.store.add_note(article.id, notes).await?;
        tracing::info!(article_id = article.id, note_id = note.id, "notes generated");
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentConfig;
    use crate::content::{content_hash, ContentError};
    use learnflow_core::llm::ScriptedLlm;
    use learnflow_core::models::{ArticleContent, NewArticle, NewSession};
    use learnflow_core::store::memory::InMemoryStore;

    async fn setup(llm: Arc<ScriptedLlm>) -> (Arc<InMemoryStore>, NoteTaker, Article) {
        let store = Arc::new(InMemoryStore::new());
        let session = store
            .create_session(NewSession {
                user_id: "u".to_string(),
                year: 2024,
                month: 2,
                day: 3,
                title: "S".to_string(),
            })
            .await
            .unwrap();
        let article = store
            .create_article(NewArticle {
                user_id: "u".to_string(),
                session_id: session.id,
                title: "Traits".to_string(),
                url: "https://example.com/traits".to_string(),
                authors: None,
            })
            .await
            .unwrap();
        let body = "Traits describe behaviour shared between types.";
        store
            .put_article_content(&ArticleContent {
                article_id: article.id,
                markdown: body.to_string(),
                content_hash: content_hash(body),
                fetched_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let content = ContentConfig {
            fetch_remote: false,
            ..ContentConfig::default()
        };
        let resolver = Arc::new(ContentResolver::new(store.clone(), &content).unwrap());
        let taker = NoteTaker::new(store.clone(), llm, resolver, Model::Gpt35Turbo16k);
        (store, taker, article)
    }

    #[tokio::test]
    async fn notes_are_stored() {
        let llm = Arc::new(ScriptedLlm::new(|p| {
            assert!(p.user.contains("Title: Traits"));
            assert!(p.user.contains("shared between types"));
            Ok("- traits define shared behaviour\n".to_string())
        }));
        let (store, taker, article) = setup(llm).await;

        let note = taker.take_notes(&article).await.unwrap();
        assert_eq!(note.note, "- traits define shared behaviour");
        let listed = store.list_notes(article.id).await.unwrap();
        assert_eq!(listed, vec![note]);
    }

    #[tokio::test]
    async fn failed_generation_stores_nothing() {
        let llm = Arc::new(ScriptedLlm::new(|_| anyhow::bail!("upstream down")));
        let (store, taker, article) = setup(llm).await;
        assert!(taker.take_notes(&article).await.is_err());
        assert!(store.list_notes(article.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn article_without_content_gets_no_notes() {
        let llm = Arc::new(ScriptedLlm::new(|_| Ok("- invented".to_string())));
        let (store, taker, article) = setup(llm.clone()).await;
        let bare = store
            .create_article(NewArticle {
                user_id: "u".to_string(),
                session_id: article.session_id,
                title: "Generics".to_string(),
                url: "https://example.com/generics".to_string(),
                authors: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            taker.take_notes(&bare).await,
            Err(GenerationError::Content(ContentError::Missing(_)))
        ));
        assert_eq!(llm.calls(), 0);
        assert!(store.list_notes(bare.id).await.unwrap().is_empty());
    }
}
