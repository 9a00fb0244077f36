//! Concrete [`LlmClient`] implementations.
//!
//! | Provider | Client |
//! |----------|--------|
//! | `disabled` | [`DisabledClient`]: every generation fails |
//! | `openai` | [`OpenAiClient`]: chat completions API with retry and backoff |
//!
//! The API key is read from the environment variable named by
//! `[llm].api_key_env` once, when the client is created.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry
//!
//! Delays grow as 1s, 2s, 4s, ... capped at 32s.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use learnflow_core::llm::{GenerationProfile, LlmClient, Model, Prompt, Provider};

use crate::config::LlmConfig;

/// Client used when `[llm].provider = "disabled"`.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn provider(&self) -> Provider {
        Provider::Disabled
    }

    async fn generate(
        &self,
        _model: Model,
        _profile: GenerationProfile,
        _prompt: &Prompt,
    ) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

/// OpenAI chat completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_retries: u32,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Fails when the API key variable is unset or empty.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate(
        &self,
        model: Model,
        profile: GenerationProfile,
        prompt: &Prompt,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": model.as_str(),
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": profile.temperature(),
            "top_p": profile.top_p(),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, model = %model, "transient OpenAI error");
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "OpenAI request failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Chat completion failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a chat completions reply.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;

    if content.trim().is_empty() {
        bail!("OpenAI returned an empty completion");
    }
    Ok(content.to_string())
}

/// Build the client selected by `[llm].provider`.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider {
        Provider::Disabled => Ok(Arc::new(DisabledClient)),
        Provider::OpenAi => Ok(Arc::new(OpenAiClient::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    fn prompt() -> Prompt {
        Prompt::new("system", "user")
    }

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "hello");
    }

    #[test]
    fn rejects_missing_or_empty_content() {
        assert!(parse_chat_response(&serde_json::json!({ "choices": [] })).is_err());
        let empty = serde_json::json!({ "choices": [{ "message": { "content": "  " } }] });
        assert!(parse_chat_response(&empty).is_err());
    }

    #[tokio::test]
    async fn disabled_client_always_fails() {
        let err = DisabledClient
            .generate(Model::Gpt35Turbo16k, GenerationProfile::Precise, &prompt())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn openai_requires_key() {
        let config = LlmConfig {
            provider: Provider::OpenAi,
            api_key_env: "LEARNFLOW_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = create_client(&config).err().unwrap();
        assert!(err.to_string().contains("LEARNFLOW_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config_for(base_url: String, max_retries: u32) -> LlmConfig {
        LlmConfig {
            provider: Provider::OpenAi,
            base_url,
            max_retries,
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/chat/completions",
                post(
                    |State(calls): State<Arc<AtomicUsize>>,
                     Json(body): Json<serde_json::Value>| async move {
                        assert_eq!(body["model"], "gpt-3.5-turbo-16k");
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
                        }
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "choices": [{ "message": { "content": "done" } }]
                            })),
                        )
                    },
                ),
            )
            .with_state(calls.clone());
        let base = serve(router).await;

        let client = OpenAiClient::with_key(&config_for(base, 1), "k".to_string()).unwrap();
        let out = client
            .generate(Model::Gpt35Turbo16k, GenerationProfile::Precise, &prompt())
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/chat/completions",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }),
            )
            .with_state(calls.clone());
        let base = serve(router).await;

        let client = OpenAiClient::with_key(&config_for(base, 3), "k".to_string()).unwrap();
        let err = client
            .generate(Model::Gpt4o, GenerationProfile::Precise, &prompt())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
