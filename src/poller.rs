//! Client side of the asynchronous sort: submit, then poll until done.
//!
//! [`poll_until_sorted`] waits one interval, polls, and repeats until one
//! of three terminal conditions:
//!
//! | Poll reply | Outcome |
//! |------------|---------|
//! | `200` with a non-empty ranking | [`PollOutcome::Sorted`] |
//! | failure record or any hard error | [`PollOutcome::Failed`] |
//! | wall-clock cap reached | [`PollOutcome::TimedOut`] |
//!
//! Returning is the cancellation: once an outcome is produced no further
//! poll is issued. With the defaults (5 s interval, 180 s cap) at most 35
//! polls are made.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use learnflow_core::models::RankedArticle;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::{sleep_until, timeout_at, Instant};
use uuid::Uuid;

use crate::config::{AuthMode, Config};
use crate::dispatch::ArticleRef;
use crate::error::ErrorBody;

/// What one poll of the sort status endpoint said.
#[derive(Debug, Clone, PartialEq)]
pub enum SortStatusReply {
    InProgress,
    Sorted(Vec<RankedArticle>),
    Failed(String),
}

/// Anything that can answer "is session N sorted yet?".
#[async_trait]
pub trait SortStatusSource: Send + Sync {
    async fn poll(&self, session_id: i64) -> Result<SortStatusReply>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Sorted(Vec<RankedArticle>),
    Failed(String),
    TimedOut { attempts: u32 },
}

/// Poll `source` for `session_id` until a terminal outcome.
pub async fn poll_until_sorted(
    source: &dyn SortStatusSource,
    session_id: i64,
    policy: PollPolicy,
) -> PollOutcome {
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut next = start + policy.interval;
    let mut attempts = 0u32;

    loop {
        if next >= deadline {
            sleep_until(deadline).await;
            return PollOutcome::TimedOut { attempts };
        }
        sleep_until(next).await;
        next += policy.interval;

        attempts += 1;
        let reply = match timeout_at(deadline, source.poll(session_id)).await {
            Ok(reply) => reply,
            Err(_) => return PollOutcome::TimedOut { attempts },
        };

        match reply {
            Ok(SortStatusReply::Sorted(articles)) if !articles.is_empty() => {
                tracing::debug!(session_id, attempts, "sort complete");
                return PollOutcome::Sorted(articles);
            }
            Ok(SortStatusReply::Sorted(_)) | Ok(SortStatusReply::InProgress) => {
                tracing::debug!(session_id, attempts, "sort still in progress");
            }
            Ok(SortStatusReply::Failed(message)) => return PollOutcome::Failed(message),
            Err(e) => return PollOutcome::Failed(format!("{:#}", e)),
        }
    }
}

/// How the client identifies itself to the server.
#[derive(Debug, Clone)]
pub enum ClientIdentity {
    Header { name: String, value: String },
    Bearer(String),
    Anonymous,
}

impl ClientIdentity {
    /// Resolve from `[auth]` and `[client]`, reading a bearer token from
    /// `[client].token_env` in jwt mode.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.auth.mode {
            AuthMode::Header => Ok(match &config.client.user_id {
                Some(user) => ClientIdentity::Header {
                    name: config.auth.user_header.clone(),
                    value: user.clone(),
                },
                None => ClientIdentity::Anonymous,
            }),
            AuthMode::Jwt => match &config.client.token_env {
                Some(var) => {
                    let token = std::env::var(var)
                        .with_context(|| format!("{} environment variable not set", var))?;
                    Ok(ClientIdentity::Bearer(token))
                }
                None => Ok(ClientIdentity::Anonymous),
            },
        }
    }
}

/// HTTP client for a running LearnFlow server.
pub struct HttpSortClient {
    http: reqwest::Client,
    base_url: String,
    identity: ClientIdentity,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReply {
    request_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortedReply {
    sorted_articles: Vec<RankedArticle>,
}

#[derive(Deserialize)]
struct SummaryReply {
    summary: String,
}

#[derive(Deserialize)]
struct NotesReply {
    notes: String,
}

impl HttpSortClient {
    pub fn new(base_url: &str, identity: ClientIdentity) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.client.base_url, ClientIdentity::from_config(config)?)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.identity {
            ClientIdentity::Header { name, value } => builder.header(name.as_str(), value.as_str()),
            ClientIdentity::Bearer(token) => builder.bearer_auth(token),
            ClientIdentity::Anonymous => builder,
        }
    }

    /// Schedule a sort and return its request id.
    pub async fn submit(
        &self,
        session_id: i64,
        articles: Option<Vec<ArticleRef>>,
    ) -> Result<Uuid> {
        let body = serde_json::json!({ "sessionId": session_id, "articles": articles });
        let response = self
            .request(reqwest::Method::POST, "/sessions/sort")
            .json(&body)
            .send()
            .await
            .context("Failed to reach LearnFlow server")?;
        let reply: SubmitReply = expect_json(response).await?;
        Ok(reply.request_id)
    }

    pub async fn summarize(&self, article_id: i64, use_cache: bool) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/articles/summary")
            .json(&serde_json::json!({ "articleId": article_id, "useCache": use_cache }))
            .send()
            .await
            .context("Failed to reach LearnFlow server")?;
        let reply: SummaryReply = expect_json(response).await?;
        Ok(reply.summary)
    }

    pub async fn notes(&self, article_id: i64) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/articles/notes")
            .json(&serde_json::json!({ "articleId": article_id }))
            .send()
            .await
            .context("Failed to reach LearnFlow server")?;
        let reply: NotesReply = expect_json(response).await?;
        Ok(reply.notes)
    }
}

#[async_trait]
impl SortStatusSource for HttpSortClient {
    async fn poll(&self, session_id: i64) -> Result<SortStatusReply> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/sessions/sort?sessionId={}", session_id),
            )
            .send()
            .await
            .context("Failed to reach LearnFlow server")?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(SortStatusReply::InProgress),
            StatusCode::OK => {
                let reply: SortedReply = response.json().await?;
                Ok(SortStatusReply::Sorted(reply.sorted_articles))
            }
            status => {
                let error = error_of(response).await;
                match error {
                    Some(body) if body.error.code == "sort_failed" => {
                        Ok(SortStatusReply::Failed(body.error.message))
                    }
                    Some(body) => bail!("{} {}: {}", status, body.error.code, body.error.message),
                    None => bail!("unexpected status {}", status),
                }
            }
        }
    }
}

async fn error_of(response: reqwest::Response) -> Option<ErrorBody> {
    response.json::<ErrorBody>().await.ok()
}

async fn expect_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| anyhow!("Invalid response from server: {}", e));
    }
    match error_of(response).await {
        Some(body) => bail!("{} {}: {}", status, body.error.code, body.error.message),
        None => bail!("unexpected status {}", status),
    }
}
