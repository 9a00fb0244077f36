//! TOML configuration parsing and validation.
//!
//! Everything the service needs is read from one file at startup. Every
//! section except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/learnflow.sqlite"
//! ```
//!
//! Secrets are never stored in the file; `[llm].api_key_env` and
//! `[auth].jwt_secret_env` name the environment variables that hold them,
//! and they are read once when services are assembled.

use anyhow::{Context, Result};
use learnflow_core::llm::{Model, Provider};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sorting: SortingConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// How the caller's identity is resolved on each request.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// A fronting identity provider has already authenticated the caller
    /// and forwards the user id in a trusted header.
    #[default]
    Header,
    /// The caller presents an HS256 bearer token; the user id is its `sub`.
    Jwt,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            user_header: default_user_header(),
            jwt_secret_env: default_jwt_secret_env(),
        }
    }
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}
fn default_jwt_secret_env() -> String {
    "LEARNFLOW_JWT_SECRET".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_long_context_model")]
    pub summary_model: Model,
    #[serde(default = "default_long_context_model")]
    pub ranking_model: Model,
    #[serde(default = "default_long_context_model")]
    pub notes_model: Model,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            summary_model: default_long_context_model(),
            ranking_model: default_long_context_model(),
            notes_model: default_long_context_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_long_context_model() -> Model {
    Model::Gpt35Turbo16k
}
fn default_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SortingConfig {
    /// Sort jobs processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs that may wait in the queue before submissions are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Summaries generated concurrently within one job.
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,
    /// Whole-ranking attempts before a malformed model reply fails the job.
    #[serde(default = "default_max_rank_attempts")]
    pub max_rank_attempts: u32,
}

impl Default for SortingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            summary_concurrency: default_summary_concurrency(),
            max_rank_attempts: default_max_rank_attempts(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}
fn default_summary_concurrency() -> usize {
    4
}
fn default_max_rank_attempts() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    /// Fetch the article URL when no readable content is cached.
    #[serde(default = "default_fetch_remote")]
    pub fetch_remote: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            fetch_remote: default_fetch_remote(),
            max_chars: default_max_chars(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_fetch_remote() -> bool {
    true
}
fn default_max_chars() -> usize {
    48_000
}
fn default_fetch_timeout_secs() -> u64 {
    20
}

/// Settings for the `sort` / `status` CLI commands, which talk to a
/// running server over HTTP.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Sent as the identity header in `header` auth mode.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Environment variable holding a bearer token for `jwt` auth mode.
    #[serde(default)]
    pub token_env: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            user_id: None,
            token_env: None,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn default_client_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_poll_timeout_secs() -> u64 {
    180
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.auth.mode == AuthMode::Header && config.auth.user_header.trim().is_empty() {
        anyhow::bail!("auth.user_header must not be empty in header mode");
    }
    if config.auth.mode == AuthMode::Jwt && config.auth.jwt_secret_env.trim().is_empty() {
        anyhow::bail!("auth.jwt_secret_env must name an environment variable in jwt mode");
    }

    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    // Validate sorting
    if config.sorting.workers == 0 {
        anyhow::bail!("sorting.workers must be > 0");
    }
    if config.sorting.queue_capacity == 0 {
        anyhow::bail!("sorting.queue_capacity must be > 0");
    }
    if config.sorting.summary_concurrency == 0 {
        anyhow::bail!("sorting.summary_concurrency must be > 0");
    }
    if config.sorting.max_rank_attempts == 0 {
        anyhow::bail!("sorting.max_rank_attempts must be >= 1");
    }

    if config.content.max_chars == 0 {
        anyhow::bail!("content.max_chars must be > 0");
    }

    // Validate client polling
    if config.client.poll_interval_secs == 0 {
        anyhow::bail!("client.poll_interval_secs must be > 0");
    }
    if config.client.poll_timeout_secs < config.client.poll_interval_secs {
        anyhow::bail!("client.poll_timeout_secs must be >= client.poll_interval_secs");
    }

    Ok(config)
}
