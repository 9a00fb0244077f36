//! LLM capability trait and its closed configuration enums.
//!
//! Every component that talks to a language model does so through
//! [`LlmClient::generate`]. Provider, model and sampling profile are closed
//! enums so an unknown name is rejected when configuration is loaded rather
//! than deep inside a request.
//!
//! Concrete clients (OpenAI, disabled) live in the `learnflow` app crate.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which backend serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    #[default]
    Disabled,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Disabled => "disabled",
        }
    }
}

/// Chat models known to the service, with their context windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-3.5-turbo-16k")]
    Gpt35Turbo16k,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "gpt-4-turbo")]
    Gpt4Turbo,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
}

impl Model {
    pub const ALL: [Model; 6] = [
        Model::Gpt35Turbo,
        Model::Gpt35Turbo16k,
        Model::Gpt4,
        Model::Gpt4Turbo,
        Model::Gpt4o,
        Model::Gpt4oMini,
    ];

    /// The identifier sent to the provider API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt35Turbo => "gpt-3.5-turbo",
            Model::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
            Model::Gpt4 => "gpt-4",
            Model::Gpt4Turbo => "gpt-4-turbo",
            Model::Gpt4o => "gpt-4o",
            Model::Gpt4oMini => "gpt-4o-mini",
        }
    }

    /// Total tokens (prompt + completion) the model accepts.
    pub fn context_window(&self) -> usize {
        match self {
            Model::Gpt35Turbo => 4_096,
            Model::Gpt35Turbo16k => 16_385,
            Model::Gpt4 => 8_192,
            Model::Gpt4Turbo | Model::Gpt4o | Model::Gpt4oMini => 128_000,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Model::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown model: '{}'", s))
    }
}

/// Sampling profile for a generation.
///
/// `Precise` is used for summaries, notes and ranking; `Creative` for
/// open-ended suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProfile {
    Precise,
    Creative,
}

impl GenerationProfile {
    pub fn temperature(&self) -> f32 {
        match self {
            GenerationProfile::Precise => 0.2,
            GenerationProfile::Creative => 0.9,
        }
    }

    pub fn top_p(&self) -> f32 {
        match self {
            GenerationProfile::Precise => 0.9,
            GenerationProfile::Creative => 1.0,
        }
    }
}

/// A system + user message pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Rough token estimate (4 characters per token) for window checks.
    pub fn estimated_tokens(&self) -> usize {
        (self.system.chars().count() + self.user.chars().count()).div_ceil(4)
    }
}

/// Capability interface for text generation.
///
/// Implementations must be `Send + Sync`; one client is shared by the
/// HTTP handlers and the background sort worker.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The backend this client talks to.
    fn provider(&self) -> Provider;

    /// Generate a completion for `prompt` with the given model and profile.
    async fn generate(
        &self,
        model: Model,
        profile: GenerationProfile,
        prompt: &Prompt,
    ) -> Result<String>;
}

/// Deterministic client driven by a closure over the prompt.
///
/// Records every prompt it receives. Used by tests and offline demos to
/// stand in for a real provider.
pub struct ScriptedLlm {
    responder: Box<dyn Fn(&Prompt) -> Result<String> + Send + Sync>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedLlm {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Prompt) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider(&self) -> Provider {
        Provider::Disabled
    }

    async fn generate(
        &self,
        _model: Model,
        _profile: GenerationProfile,
        prompt: &Prompt,
    ) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted client lock poisoned"))?
            .push(prompt.clone());
        (self.responder)(prompt)
    }
}
