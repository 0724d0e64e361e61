use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Text-generation backend used to produce replies.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gemini,
    Openrouter,
}

impl Backend {
    /// Parse the startup selector: `g`/`gemini` or `o`/`openrouter`, any case.
    pub fn from_selector(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "g" | "gemini" => Some(Backend::Gemini),
            "o" | "openrouter" => Some(Backend::Openrouter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Gemini => write!(f, "gemini"),
            Backend::Openrouter => write!(f, "openrouter"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default = "default_discord_base_url")]
    pub base_url: String,
    /// Prepended to the token in the Authorization header, e.g. "Bot ".
    #[serde(default)]
    pub token_prefix: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenRouterConfig {
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
    #[serde(default = "default_openrouter_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default)]
    pub read_delay_secs: Option<u64>,
    #[serde(default)]
    pub reply_delay_secs: Option<u64>,
    /// Keep a message eligible when posting its reply fails.
    #[serde(default)]
    pub retry_failed_posts: bool,
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u64,
}

fn default_discord_base_url() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_openrouter_model() -> String {
    "meta-llama/llama-3.1-70b-instruct:free".to_string()
}

fn default_countdown_secs() -> u64 {
    3
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            base_url: default_discord_base_url(),
            token_prefix: String::new(),
            channel_id: None,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: default_openrouter_base_url(),
            model: default_openrouter_model(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            read_delay_secs: None,
            reply_delay_secs: None,
            retry_failed_posts: false,
            countdown_secs: default_countdown_secs(),
        }
    }
}

impl Config {
    /// Load the TOML config at `path`.
    ///
    /// When `required` is false a missing file yields the defaults; every
    /// run setting left unset here is asked for interactively later.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() && !required {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config TOML")
    }
}

/// API credentials, read once from the environment.
///
/// Missing values are not rejected here: an empty key surfaces later as an
/// authentication failure from the HTTP call that needs it.
#[derive(Clone, Default)]
pub struct Secrets {
    pub discord_token: String,
    pub google_api_key: String,
    pub openrouter_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("discord_token", &redact(&self.discord_token))
            .field("google_api_key", &redact(&self.google_api_key))
            .field("openrouter_api_key", &redact(&self.openrouter_api_key))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            discord_token: get("DISCORD_TOKEN"),
            google_api_key: get("GOOGLE_API_KEY"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
        }
    }

    /// API key for the given backend.
    pub fn api_key(&self, backend: Backend) -> &str {
        match backend {
            Backend::Gemini => &self.google_api_key,
            Backend::Openrouter => &self.openrouter_api_key,
        }
    }
}
