//! Readable-content resolution for articles.
//!
//! The summarizer needs the text of an article, not just its title. Content
//! is resolved in this order:
//!
//! 1. The `article_content` row for the article, if one was stored.
//! 2. When `[content].fetch_remote` is on, a GET of the article URL. HTML is
//!    reduced to text, truncated to `[content].max_chars`, hashed and stored
//!    so the next resolution is a cache hit.
//!
//! An article with neither is [`ContentError::Missing`]; the title alone is
//! never treated as content.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use learnflow_core::models::{Article, ArticleContent};
use learnflow_core::store::ArticleStore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ContentConfig;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("article {0} has no readable content")]
    Missing(i64),

    #[error("failed to fetch article content: {0}")]
    Fetch(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct ContentResolver {
    store: Arc<dyn ArticleStore>,
    http: Option<reqwest::Client>,
    max_chars: usize,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn ArticleStore>, config: &ContentConfig) -> Result<Self> {
        let http = if config.fetch_remote {
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .user_agent(concat!("learnflow/", env!("CARGO_PKG_VERSION")))
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self {
            store,
            http,
            max_chars: config.max_chars,
        })
    }

    /// Text to summarize for `article`.
    pub async fn resolve(&self, article: &Article) -> Result<String, ContentError> {
        if let Some(cached) = self.store.get_article_content(article.id).await? {
            if !cached.markdown.trim().is_empty() {
                return Ok(cached.markdown);
            }
        }

        let Some(http) = &self.http else {
            return Err(ContentError::Missing(article.id));
        };

        let text = fetch_text(http, &article.url)
            .await
            .map_err(|e| ContentError::Fetch(format!("{:#}", e)))?;
        let text = truncate_chars(&text, self.max_chars);
        if text.trim().is_empty() {
            return Err(ContentError::Missing(article.id));
        }

        let content = ArticleContent {
            article_id: article.id,
            content_hash: content_hash(&text),
            markdown: text,
            fetched_at: Utc::now(),
        };
        self.store.put_article_content(&content).await?;
        tracing::debug!(
            article_id = article.id,
            chars = content.markdown.len(),
            "stored article content"
        );
        Ok(content.markdown)
    }
}

async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String> {
    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?
        .error_for_status()
        .with_context(|| format!("Failed to fetch {}", url))?;

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("html"));
    let body = response.text().await?;

    Ok(if is_html { html_to_text(&body) } else { body })
}

/// SHA-256 of the stored text, hex encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Drop tags, `<script>` and `<style>` bodies, and collapse whitespace.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let lower = html.to_ascii_lowercase();
    let mut i = 0;

    while i < html.len() {
        let rest = &lower[i..];
        if rest.starts_with("<script") || rest.starts_with("<style") {
            let close = if rest.starts_with("<script") {
                "</script>"
            } else {
                "</style>"
            };
            i = match rest.find(close) {
                Some(end) => i + end + close.len(),
                None => html.len(),
            };
            out.push(' ');
            continue;
        }
        if rest.starts_with('<') {
            i = match rest.find('>') {
                Some(end) => i + end + 1,
                None => html.len(),
            };
            out.push(' ');
            continue;
        }
        let next = rest.find('<').map(|n| i + n).unwrap_or(html.len());
        out.push_str(&html[i..next]);
        i = next;
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnflow_core::models::{NewArticle, NewSession};
    use learnflow_core::store::memory::InMemoryStore;

    async fn article(store: &InMemoryStore) -> Article {
        let session = store
            .create_session(NewSession {
                user_id: "u".to_string(),
                year: 2024,
                month: 1,
                day: 2,
                title: "S".to_string(),
            })
            .await
            .unwrap();
        store
            .create_article(NewArticle {
                user_id: "u".to_string(),
                session_id: session.id,
                title: "Ownership in Rust".to_string(),
                url: "http://127.0.0.1:9/unreachable".to_string(),
                authors: None,
            })
            .await
            .unwrap()
    }

    fn offline() -> ContentConfig {
        ContentConfig {
            fetch_remote: false,
            ..ContentConfig::default()
        }
    }

    #[tokio::test]
    async fn prefers_stored_content() {
        let store = Arc::new(InMemoryStore::new());
        let a = article(&store).await;
        store
            .put_article_content(&ArticleContent {
                article_id: a.id,
                markdown: "# Borrowing".to_string(),
                content_hash: content_hash("# Borrowing"),
                fetched_at: Utc::now(),
            })
            .await
            .unwrap();

        let resolver = ContentResolver::new(store.clone(), &ContentConfig::default()).unwrap();
        assert_eq!(resolver.resolve(&a).await.unwrap(), "# Borrowing");
    }

    #[tokio::test]
    async fn offline_without_stored_content_is_missing() {
        let store = Arc::new(InMemoryStore::new());
        let a = article(&store).await;
        let resolver = ContentResolver::new(store, &offline()).unwrap();
        assert!(matches!(
            resolver.resolve(&a).await,
            Err(ContentError::Missing(id)) if id == a.id
        ));
    }

    #[tokio::test]
    async fn unreachable_url_is_a_fetch_error() {
        let store = Arc::new(InMemoryStore::new());
        let a = article(&store).await;
        let resolver = ContentResolver::new(store.clone(), &ContentConfig::default()).unwrap();
        assert!(matches!(
            resolver.resolve(&a).await,
            Err(ContentError::Fetch(_))
        ));
        assert!(store.get_article_content(a.id).await.unwrap().is_none());
    }

    #[test]
    fn strips_markup() {
        let html = "<html><head><style>p{}</style><script>x()</script></head>\
                    <body><h1>Title</h1>\n<p>Body  text</p></body></html>";
        assert_eq!(html_to_text(html), "Title Body text");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("ba7816bf"));
    }
}
